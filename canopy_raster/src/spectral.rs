//! Spectral-index generator (spec §4.8): matches catalog wavelengths to
//! actual raster bands, then evaluates an arithmetic formula per tile.

use anyhow::{Result, bail, ensure};
use canopy_core::{CanopyError, RasterSource};
use ndarray::{Array2, ArrayView2};
use std::collections::BTreeMap;

/// A named spectral-index formula over symbolic band variables, each bound
/// to a required wavelength (nanometers).
#[derive(Clone, Debug)]
pub struct IndexDefinition {
	pub name: String,
	pub formula: String,
	/// Symbolic variable name → required wavelength, in nanometers.
	pub wavelengths_nm: BTreeMap<String, f64>,
}

/// Resolves each of `definition`'s required wavelengths to the nearest
/// actual band on `source`, within `max_tolerance_nm`.
///
/// # Errors
/// Returns [`CanopyError::WavelengthUnmatched`] if any required wavelength
/// has no band within tolerance, or if the source has no wavelength
/// metadata on any band at all.
pub fn resolve_bands(source: &dyn RasterSource, definition: &IndexDefinition, max_tolerance_nm: f64) -> Result<BTreeMap<String, usize>> {
	let bands = source.bands().len();
	let available: Vec<(usize, f64)> = (1..=bands).filter_map(|b| source.band_wavelength_nm(b).map(|wl| (b, wl))).collect();
	ensure!(!available.is_empty(), "raster source has no band wavelength metadata");

	let mut resolved = BTreeMap::new();
	for (variable, &requested) in &definition.wavelengths_nm {
		let (band, nearest) = available
			.iter()
			.min_by(|a, b| (a.1 - requested).abs().total_cmp(&(b.1 - requested).abs()))
			.copied()
			.expect("available is non-empty");
		let delta = (nearest - requested).abs();
		if delta > max_tolerance_nm {
			return Err(CanopyError::WavelengthUnmatched {
				requested,
				tolerance: max_tolerance_nm,
				nearest,
			}
			.into());
		}
		resolved.insert(variable.clone(), band);
	}
	Ok(resolved)
}

/// Evaluates `formula` across the bound band arrays in `variables`,
/// masking positions where any contributing band equals `nodata` (spec
/// §4.8: "masking positions where any contributing band equals nodata").
pub fn evaluate_index_tile(formula: &str, variables: &BTreeMap<String, ArrayView2<'_, f64>>, nodata: Option<f64>, output_nodata: f64) -> Result<Array2<f64>> {
	let expr = parse_expression(formula)?;
	let Some((&_, first)) = variables.iter().next() else {
		bail!("no band arrays supplied to evaluate formula '{formula}'");
	};
	let (height, width) = first.dim();
	for (name, array) in variables {
		ensure!(array.dim() == (height, width), "band '{name}' shape {:?} does not match {:?}", array.dim(), (height, width));
	}

	let mut out = Array2::<f64>::zeros((height, width));
	for r in 0..height {
		for c in 0..width {
			let masked = variables.values().any(|array| is_nodata(array[[r, c]], nodata));
			if masked {
				out[[r, c]] = output_nodata;
				continue;
			}
			let mut scope = BTreeMap::new();
			for (name, array) in variables {
				scope.insert(name.clone(), array[[r, c]]);
			}
			out[[r, c]] = expr.eval(&scope)?;
		}
	}
	Ok(out)
}

fn is_nodata(value: f64, nodata: Option<f64>) -> bool {
	match nodata {
		Some(nd) if nd.is_nan() => value.is_nan(),
		Some(nd) => value == nd,
		None => false,
	}
}

/// A parsed arithmetic expression tree over named variables. Supports
/// `+ - * /`, unary minus, parentheses, and bare numeric literals — the
/// grammar spec §4.8's "arithmetic expression" formulas need, nothing more.
#[derive(Clone, Debug, PartialEq)]
enum Expr {
	Number(f64),
	Variable(String),
	Neg(Box<Expr>),
	Add(Box<Expr>, Box<Expr>),
	Sub(Box<Expr>, Box<Expr>),
	Mul(Box<Expr>, Box<Expr>),
	Div(Box<Expr>, Box<Expr>),
}

impl Expr {
	fn eval(&self, scope: &BTreeMap<String, f64>) -> Result<f64> {
		Ok(match self {
			Expr::Number(n) => *n,
			Expr::Variable(name) => *scope
				.get(name)
				.ok_or_else(|| anyhow::anyhow!("formula references unbound variable '{name}'"))?,
			Expr::Neg(e) => -e.eval(scope)?,
			Expr::Add(a, b) => a.eval(scope)? + b.eval(scope)?,
			Expr::Sub(a, b) => a.eval(scope)? - b.eval(scope)?,
			Expr::Mul(a, b) => a.eval(scope)? * b.eval(scope)?,
			Expr::Div(a, b) => a.eval(scope)? / b.eval(scope)?,
		})
	}
}

fn parse_expression(formula: &str) -> Result<Expr> {
	let tokens = tokenize(formula)?;
	let mut parser = Parser { tokens, pos: 0 };
	let expr = parser.parse_add_sub()?;
	ensure!(parser.pos == parser.tokens.len(), "unexpected trailing input in formula '{formula}'");
	Ok(expr)
}

#[derive(Clone, Debug, PartialEq)]
enum Token {
	Number(f64),
	Ident(String),
	Plus,
	Minus,
	Star,
	Slash,
	LParen,
	RParen,
}

fn tokenize(formula: &str) -> Result<Vec<Token>> {
	let mut tokens = Vec::new();
	let chars: Vec<char> = formula.chars().collect();
	let mut i = 0;
	while i < chars.len() {
		let ch = chars[i];
		match ch {
			' ' | '\t' | '\n' => i += 1,
			'+' => {
				tokens.push(Token::Plus);
				i += 1;
			}
			'-' => {
				tokens.push(Token::Minus);
				i += 1;
			}
			'*' => {
				tokens.push(Token::Star);
				i += 1;
			}
			'/' => {
				tokens.push(Token::Slash);
				i += 1;
			}
			'(' => {
				tokens.push(Token::LParen);
				i += 1;
			}
			')' => {
				tokens.push(Token::RParen);
				i += 1;
			}
			c if c.is_ascii_digit() || c == '.' => {
				let start = i;
				while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
					i += 1;
				}
				let text: String = chars[start..i].iter().collect();
				let value: f64 = text.parse().map_err(|_| anyhow::anyhow!("invalid number literal '{text}' in formula"))?;
				tokens.push(Token::Number(value));
			}
			c if c.is_alphabetic() || c == '_' => {
				let start = i;
				while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
					i += 1;
				}
				tokens.push(Token::Ident(chars[start..i].iter().collect()));
			}
			other => bail!("unexpected character '{other}' in formula"),
		}
	}
	Ok(tokens)
}

struct Parser {
	tokens: Vec<Token>,
	pos: usize,
}

impl Parser {
	fn peek(&self) -> Option<&Token> {
		self.tokens.get(self.pos)
	}

	fn parse_add_sub(&mut self) -> Result<Expr> {
		let mut left = self.parse_mul_div()?;
		loop {
			match self.peek() {
				Some(Token::Plus) => {
					self.pos += 1;
					left = Expr::Add(Box::new(left), Box::new(self.parse_mul_div()?));
				}
				Some(Token::Minus) => {
					self.pos += 1;
					left = Expr::Sub(Box::new(left), Box::new(self.parse_mul_div()?));
				}
				_ => break,
			}
		}
		Ok(left)
	}

	fn parse_mul_div(&mut self) -> Result<Expr> {
		let mut left = self.parse_unary()?;
		loop {
			match self.peek() {
				Some(Token::Star) => {
					self.pos += 1;
					left = Expr::Mul(Box::new(left), Box::new(self.parse_unary()?));
				}
				Some(Token::Slash) => {
					self.pos += 1;
					left = Expr::Div(Box::new(left), Box::new(self.parse_unary()?));
				}
				_ => break,
			}
		}
		Ok(left)
	}

	fn parse_unary(&mut self) -> Result<Expr> {
		if matches!(self.peek(), Some(Token::Minus)) {
			self.pos += 1;
			return Ok(Expr::Neg(Box::new(self.parse_unary()?)));
		}
		self.parse_primary()
	}

	fn parse_primary(&mut self) -> Result<Expr> {
		match self.tokens.get(self.pos).cloned() {
			Some(Token::Number(n)) => {
				self.pos += 1;
				Ok(Expr::Number(n))
			}
			Some(Token::Ident(name)) => {
				self.pos += 1;
				Ok(Expr::Variable(name))
			}
			Some(Token::LParen) => {
				self.pos += 1;
				let inner = self.parse_add_sub()?;
				ensure!(matches!(self.peek(), Some(Token::RParen)), "expected closing parenthesis");
				self.pos += 1;
				Ok(inner)
			}
			other => bail!("unexpected token in formula: {other:?}"),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use approx::assert_abs_diff_eq;
	use ndarray::array;

	#[test]
	fn ndvi_formula_evaluates_per_pixel() {
		let nir = array![[0.6, 0.5]];
		let red = array![[0.1, 0.2]];
		let mut vars = BTreeMap::new();
		vars.insert("nir".to_string(), nir.view());
		vars.insert("red".to_string(), red.view());

		let out = evaluate_index_tile("(nir - red) / (nir + red)", &vars, None, -9999.0).unwrap();
		assert_abs_diff_eq!(out[[0, 0]], (0.6 - 0.1) / (0.6 + 0.1), epsilon = 1e-9);
		assert_abs_diff_eq!(out[[0, 1]], (0.5 - 0.2) / (0.5 + 0.2), epsilon = 1e-9);
	}

	#[test]
	fn nodata_in_any_band_masks_output_pixel() {
		let nir = array![[0.6, -9999.0]];
		let red = array![[0.1, 0.2]];
		let mut vars = BTreeMap::new();
		vars.insert("nir".to_string(), nir.view());
		vars.insert("red".to_string(), red.view());

		let out = evaluate_index_tile("nir - red", &vars, Some(-9999.0), -9999.0).unwrap();
		assert_abs_diff_eq!(out[[0, 1]], -9999.0);
	}

	#[test]
	fn unbound_variable_errors() {
		let red = array![[0.1]];
		let mut vars = BTreeMap::new();
		vars.insert("red".to_string(), red.view());
		assert!(evaluate_index_tile("nir - red", &vars, None, -9999.0).is_err());
	}

	#[test]
	fn unary_minus_and_precedence() {
		let expr = parse_expression("-2 + 3 * 4").unwrap();
		assert_abs_diff_eq!(expr.eval(&BTreeMap::new()).unwrap(), 10.0);
	}
}
