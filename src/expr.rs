use crate::error::{BlockPrintError, Result};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Text(String),
    Number(f64),
    Bool(bool),
}

impl ParamValue {
    // false, 0, empty text, "false" and "0" are false.
    pub fn is_truthy(&self) -> bool {
        match self {
            ParamValue::Bool(value) => *value,
            ParamValue::Number(value) => *value != 0.0 && !value.is_nan(),
            ParamValue::Text(value) => {
                let v = value.trim();
                !(v.is_empty() || v == "0" || v.eq_ignore_ascii_case("false"))
            }
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Text(value) => f.write_str(value),
            ParamValue::Number(value) => write!(f, "{value}"),
            ParamValue::Bool(value) => write!(f, "{value}"),
        }
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        ParamValue::Text(value.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        ParamValue::Text(value)
    }
}

impl From<f64> for ParamValue {
    fn from(value: f64) -> Self {
        ParamValue::Number(value)
    }
}

impl From<f32> for ParamValue {
    fn from(value: f32) -> Self {
        ParamValue::Number(value as f64)
    }
}

impl From<i64> for ParamValue {
    fn from(value: i64) -> Self {
        ParamValue::Number(value as f64)
    }
}

impl From<i32> for ParamValue {
    fn from(value: i32) -> Self {
        ParamValue::Number(value as f64)
    }
}

impl From<usize> for ParamValue {
    fn from(value: usize) -> Self {
        ParamValue::Number(value as f64)
    }
}

impl From<bool> for ParamValue {
    fn from(value: bool) -> Self {
        ParamValue::Bool(value)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params {
    values: BTreeMap<String, ParamValue>,
}

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<ParamValue>) {
        self.values.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.values.get(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl<K, V> FromIterator<(K, V)> for Params
where
    K: Into<String>,
    V: Into<ParamValue>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut params = Params::new();
        for (k, v) in iter {
            params.insert(k, v);
        }
        params
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Scope<'a> {
    request: &'a Params,
    globals: Option<&'a Params>,
}

impl<'a> Scope<'a> {
    pub fn new(request: &'a Params) -> Self {
        Self {
            request,
            globals: None,
        }
    }

    pub fn with_globals(request: &'a Params, globals: &'a Params) -> Self {
        Self {
            request,
            globals: Some(globals),
        }
    }

    pub fn lookup(&self, name: &str) -> Option<&'a ParamValue> {
        self.request
            .get(name)
            .or_else(|| self.globals.and_then(|g| g.get(name)))
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Literal(String),
    Reference(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    source: String,
    segments: Vec<Segment>,
}

impl Expr {
    pub fn parse(source: impl Into<String>) -> Result<Self> {
        Self::parse_field("template", source)
    }

    // Parse errors name `field` so configuration failures point at the offending key.
    pub fn parse_field(field: &str, source: impl Into<String>) -> Result<Self> {
        let source = source.into();
        let segments = parse_segments(field, &source)?;
        Ok(Self { source, segments })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn is_static(&self) -> bool {
        self.references().next().is_none()
    }

    pub fn references(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|seg| match seg {
            Segment::Reference(name) => Some(name.as_str()),
            Segment::Literal(_) => None,
        })
    }

    pub fn resolve(&self, scope: &Scope<'_>, default: Option<&str>) -> Result<String> {
        let mut out = String::with_capacity(self.source.len());
        for seg in &self.segments {
            match seg {
                Segment::Literal(text) => out.push_str(text),
                Segment::Reference(name) => match (scope.lookup(name), default) {
                    (Some(value), _) => out.push_str(&value.to_string()),
                    (None, Some(fallback)) => out.push_str(fallback),
                    (None, None) => {
                        return Err(BlockPrintError::UnresolvedParameter {
                            name: name.clone(),
                            template: self.source.clone(),
                        });
                    }
                },
            }
        }
        Ok(out)
    }

    pub fn resolve_number(&self, field: &str, scope: &Scope<'_>) -> Result<f32> {
        let resolved = self.resolve(scope, None)?;
        parse_number(field, &resolved)
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

pub fn evaluate(template: &str, scope: &Scope<'_>, default: Option<&str>) -> Result<String> {
    Expr::parse(template)?.resolve(scope, default)
}

pub fn parse_number(field: &str, raw: &str) -> Result<f32> {
    let not_numeric = || BlockPrintError::NotNumeric {
        field: field.to_string(),
        value: raw.to_string(),
    };
    let value = raw.trim().parse::<f64>().map_err(|_| not_numeric())? as f32;
    if !value.is_finite() {
        return Err(not_numeric());
    }
    Ok(value)
}

fn parse_segments(field: &str, source: &str) -> Result<Vec<Segment>> {
    let malformed = |reason: &str| BlockPrintError::MalformedTemplate {
        field: field.to_string(),
        template: source.to_string(),
        reason: reason.to_string(),
    };

    let mut segments = Vec::new();
    let mut literal = String::new();
    let mut rest = source;
    while let Some(start) = rest.find("${") {
        literal.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            return Err(malformed("unterminated parameter reference"));
        };
        let name = after[..end].trim();
        if name.is_empty() {
            return Err(malformed("empty parameter reference"));
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(std::mem::take(&mut literal)));
        }
        segments.push(Segment::Reference(name.to_string()));
        rest = &after[end + 1..];
    }
    literal.push_str(rest);
    if !literal.is_empty() {
        segments.push(Segment::Literal(literal));
    }
    Ok(segments)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn substitutes_references() {
        let params = Params::new().with("name", "Bern").with("zoom", 4);
        let scope = Scope::new(&params);
        let out = evaluate("map of ${name} at ${ zoom }x", &scope, None).unwrap();
        assert_eq!(out, "map of Bern at 4x");
    }

    #[test]
    fn literal_dollar_signs_survive() {
        let params = Params::new();
        let out = evaluate("costs $5 {flat}", &Scope::new(&params), None).unwrap();
        assert_eq!(out, "costs $5 {flat}");
    }

    #[test]
    fn unresolved_reference_uses_default_or_fails() {
        let params = Params::new();
        let scope = Scope::new(&params);
        assert_eq!(evaluate("${x}", &scope, Some("7")).unwrap(), "7");
        let err = evaluate("a${x}b", &scope, None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Evaluation);
        assert!(matches!(
            err,
            BlockPrintError::UnresolvedParameter { ref name, .. } if name == "x"
        ));
    }

    #[test]
    fn request_params_shadow_globals() {
        let request = Params::new().with("pageNum", "override");
        let globals = Params::new().with("pageNum", 3).with("configDir", "/etc/print");
        let scope = Scope::with_globals(&request, &globals);
        assert_eq!(
            evaluate("${pageNum} ${configDir}", &scope, None).unwrap(),
            "override /etc/print"
        );
    }

    #[test]
    fn numbers_resolve_from_literals_and_params() {
        let params = Params::new().with("x", "42.5");
        let scope = Scope::new(&params);
        let ten = Expr::parse("10").unwrap();
        assert_eq!(ten.resolve_number("absoluteX", &scope).unwrap(), 10.0);
        let x = Expr::parse("${x}").unwrap();
        assert_eq!(x.resolve_number("absoluteX", &scope).unwrap(), 42.5);
    }

    #[test]
    fn malformed_numbers_name_the_field() {
        let params = Params::new();
        let err = Expr::parse("abc")
            .unwrap()
            .resolve_number("width", &Scope::new(&params))
            .unwrap_err();
        match err {
            BlockPrintError::NotNumeric { field, value } => {
                assert_eq!(field, "width");
                assert_eq!(value, "abc");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(parse_number("width", "NaN").is_err());
        assert!(parse_number("width", "").is_err());
        // Finite as f64, infinite once narrowed.
        match parse_number("width", "1e39").unwrap_err() {
            BlockPrintError::NotNumeric { field, value } => {
                assert_eq!(field, "width");
                assert_eq!(value, "1e39");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(parse_number("width", "-1e39").is_err());
        assert!(parse_number("width", "3.4e38").is_ok());
    }

    #[test]
    fn malformed_templates_are_configuration_errors() {
        let err = Expr::parse_field("url", "${open").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        let message = err.to_string();
        assert!(message.contains("url"), "{message}");
        assert!(message.contains("${open"), "{message}");
        assert!(Expr::parse("${ }").is_err());
    }

    #[test]
    fn static_templates_have_no_references() {
        assert!(Expr::parse("logo.svg").unwrap().is_static());
        let dynamic = Expr::parse("${base}/${file}").unwrap();
        assert!(!dynamic.is_static());
        assert_eq!(dynamic.references().collect::<Vec<_>>(), vec!["base", "file"]);
    }

    #[test]
    fn truthiness() {
        assert!(ParamValue::from("yes").is_truthy());
        assert!(!ParamValue::from("false").is_truthy());
        assert!(!ParamValue::from("0").is_truthy());
        assert!(!ParamValue::from(0).is_truthy());
        assert!(ParamValue::from(true).is_truthy());
    }
}
