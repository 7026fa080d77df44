//! Endpoint descriptors and parameter validation.
//!
//! An [`Endpoint`] describes one REST resource: its path template, API version,
//! declared parameters and response shape. The typed parameter `T` is the record
//! type the response maps into.

use std::collections::BTreeMap;
use std::fmt::{Debug, Display, Formatter};
use std::marker::PhantomData;

use time::macros::format_description;
use time::{Date, PrimitiveDateTime};

use crate::error::ApiError;
use crate::http_client::HttpMethod;

/// Version segment placed between the base URL and the path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiVersion {
    V3,
    V4,
    Stable,
}

impl ApiVersion {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::V3 => "v3",
            Self::V4 => "v4",
            Self::Stable => "stable",
        }
    }
}

impl Display for ApiVersion {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamLocation {
    Path,
    Query,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    String,
    Integer,
    Float,
    Boolean,
    Date,
    DateTime,
}

impl ParamType {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Float => "float",
            Self::Boolean => "boolean",
            Self::Date => "date",
            Self::DateTime => "datetime",
        }
    }
}

/// A caller-supplied or default parameter value.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Date(Date),
    DateTime(PrimitiveDateTime),
}

impl ParamValue {
    /// Whether this value may be sent for a parameter declared as `expected`.
    pub fn fits(&self, expected: ParamType) -> bool {
        matches!(
            (self, expected),
            (Self::Str(_), ParamType::String)
                | (Self::Int(_), ParamType::Integer | ParamType::Float)
                | (Self::Float(_), ParamType::Float)
                | (Self::Bool(_), ParamType::Boolean)
                | (Self::Date(_), ParamType::Date)
                | (Self::DateTime(_), ParamType::DateTime)
        )
    }

    /// Wire representation used in paths and query strings.
    pub fn render(&self) -> String {
        match self {
            Self::Str(value) => value.clone(),
            Self::Int(value) => value.to_string(),
            Self::Float(value) => value.to_string(),
            Self::Bool(value) => value.to_string(),
            Self::Date(value) => value
                .format(format_description!("[year]-[month]-[day]"))
                .unwrap_or_else(|_| value.to_string()),
            Self::DateTime(value) => value
                .format(format_description!(
                    "[year]-[month]-[day] [hour]:[minute]:[second]"
                ))
                .unwrap_or_else(|_| value.to_string()),
        }
    }

    const fn type_name(&self) -> &'static str {
        match self {
            Self::Str(_) => "string",
            Self::Int(_) => "integer",
            Self::Float(_) => "float",
            Self::Bool(_) => "boolean",
            Self::Date(_) => "date",
            Self::DateTime(_) => "datetime",
        }
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_owned())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<i64> for ParamValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for ParamValue {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<u32> for ParamValue {
    fn from(value: u32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<f64> for ParamValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for ParamValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<Date> for ParamValue {
    fn from(value: Date) -> Self {
        Self::Date(value)
    }
}

impl From<PrimitiveDateTime> for ParamValue {
    fn from(value: PrimitiveDateTime) -> Self {
        Self::DateTime(value)
    }
}

/// Default for an optional parameter. `Computed` defaults are evaluated on
/// every attempt so they can follow runtime configuration.
#[derive(Debug, Clone)]
pub enum ParamDefault {
    Fixed(ParamValue),
    Computed(fn() -> ParamValue),
}

impl ParamDefault {
    pub fn resolve(&self) -> ParamValue {
        match self {
            Self::Fixed(value) => value.clone(),
            Self::Computed(compute) => compute(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EndpointParam {
    pub name: String,
    pub location: ParamLocation,
    pub param_type: ParamType,
    pub description: String,
    pub default: Option<ParamDefault>,
    pub valid_values: Option<Vec<String>>,
}

impl EndpointParam {
    pub fn new(name: impl Into<String>, location: ParamLocation, param_type: ParamType) -> Self {
        Self {
            name: name.into(),
            location,
            param_type,
            description: String::new(),
            default: None,
            valid_values: None,
        }
    }

    pub fn path(name: impl Into<String>, param_type: ParamType) -> Self {
        Self::new(name, ParamLocation::Path, param_type)
    }

    pub fn query(name: impl Into<String>, param_type: ParamType) -> Self {
        Self::new(name, ParamLocation::Query, param_type)
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_default(mut self, default: impl Into<ParamValue>) -> Self {
        self.default = Some(ParamDefault::Fixed(default.into()));
        self
    }

    pub fn with_computed_default(mut self, compute: fn() -> ParamValue) -> Self {
        self.default = Some(ParamDefault::Computed(compute));
        self
    }

    pub fn with_valid_values<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.valid_values = Some(values.into_iter().map(Into::into).collect());
        self
    }

    fn check(&self, value: &ParamValue) -> Result<String, ApiError> {
        if !value.fits(self.param_type) {
            return Err(ApiError::invalid_param(format!(
                "parameter '{}' expects {}, got {}",
                self.name,
                self.param_type.as_str(),
                value.type_name()
            )));
        }

        let rendered = value.render();
        if let Some(valid_values) = &self.valid_values {
            if !valid_values.iter().any(|valid| *valid == rendered) {
                return Err(ApiError::invalid_param(format!(
                    "invalid value '{rendered}' for parameter '{}'; expected one of: {}",
                    self.name,
                    valid_values.join(", ")
                )));
            }
        }

        Ok(rendered)
    }
}

/// Declared shape of an endpoint's payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseShape {
    SingleItem,
    ListOfItems,
    Primitive,
}

/// Caller-supplied parameters for one logical call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params(BTreeMap<String, ParamValue>);

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.0.insert(name.into(), value.into());
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<ParamValue>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.0.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamValue)> + '_ {
        self.0.iter().map(|(name, value)| (name.as_str(), value))
    }
}

/// Parameters checked against a descriptor and rendered for the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidatedParams {
    pub path: BTreeMap<String, String>,
    pub query: Vec<(String, String)>,
}

/// Descriptor of one REST endpoint whose records deserialize into `T`.
pub struct Endpoint<T> {
    name: String,
    path: String,
    version: ApiVersion,
    method: HttpMethod,
    mandatory_params: Vec<EndpointParam>,
    optional_params: Vec<EndpointParam>,
    response_shape: ResponseShape,
    fallback_field: Option<String>,
    _record: PhantomData<fn() -> T>,
}

impl<T> Endpoint<T> {
    pub fn new(name: impl Into<String>, path: impl Into<String>, version: ApiVersion) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            version,
            method: HttpMethod::Get,
            mandatory_params: Vec::new(),
            optional_params: Vec::new(),
            response_shape: ResponseShape::SingleItem,
            fallback_field: None,
            _record: PhantomData,
        }
    }

    pub fn with_method(mut self, method: HttpMethod) -> Self {
        self.method = method;
        self
    }

    pub fn mandatory(mut self, param: EndpointParam) -> Self {
        self.mandatory_params.push(param);
        self
    }

    pub fn optional(mut self, param: EndpointParam) -> Self {
        self.optional_params.push(param);
        self
    }

    pub fn returns(mut self, shape: ResponseShape) -> Self {
        self.response_shape = shape;
        self
    }

    /// Field a bare scalar payload is wrapped into before deserializing `T`.
    pub fn with_fallback_field(mut self, field: impl Into<String>) -> Self {
        self.fallback_field = Some(field.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub const fn version(&self) -> ApiVersion {
        self.version
    }

    pub const fn method(&self) -> HttpMethod {
        self.method
    }

    pub const fn response_shape(&self) -> ResponseShape {
        self.response_shape
    }

    pub fn fallback_field(&self) -> Option<&str> {
        self.fallback_field.as_deref()
    }

    fn declared(&self, name: &str) -> Option<&EndpointParam> {
        self.mandatory_params
            .iter()
            .chain(&self.optional_params)
            .find(|param| param.name == name)
    }

    /// Checks `params` against the declared parameters, fills optional
    /// defaults and renders every value.
    pub fn validate_params(&self, params: &Params) -> Result<ValidatedParams, ApiError> {
        if let Some((unknown, _)) = params.iter().find(|(name, _)| self.declared(name).is_none()) {
            return Err(ApiError::invalid_param(format!(
                "unknown parameter '{unknown}' for endpoint '{}'",
                self.name
            )));
        }

        let mut validated = ValidatedParams::default();

        for param in &self.mandatory_params {
            let value = params.get(&param.name).ok_or_else(|| {
                ApiError::invalid_param(format!("missing mandatory parameter: {}", param.name))
            })?;
            place(&mut validated, param, param.check(value)?);
        }

        for param in &self.optional_params {
            let rendered = match (params.get(&param.name), &param.default) {
                (Some(value), _) => param.check(value)?,
                (None, Some(default)) => param.check(&default.resolve())?,
                (None, None) => continue,
            };
            place(&mut validated, param, rendered);
        }

        Ok(validated)
    }

    /// `base_url/version/path` with every `{name}` segment substituted.
    pub fn build_url(&self, base_url: &str, params: &ValidatedParams) -> Result<String, ApiError> {
        let mut resolved = String::with_capacity(self.path.len());
        let mut rest = self.path.trim_start_matches('/');

        while let Some(open) = rest.find('{') {
            let close = rest[open..].find('}').map(|offset| open + offset).ok_or_else(|| {
                ApiError::invalid_param(format!("malformed path template '{}'", self.path))
            })?;
            let name = &rest[open + 1..close];
            let value = params.path.get(name).ok_or_else(|| {
                ApiError::invalid_param(format!("missing path parameter: {name}"))
            })?;

            resolved.push_str(&rest[..open]);
            resolved.push_str(&urlencoding::encode(value));
            rest = &rest[close + 1..];
        }
        resolved.push_str(rest);

        Ok(format!(
            "{}/{}/{}",
            base_url.trim_end_matches('/'),
            self.version,
            resolved
        ))
    }
}

fn place(validated: &mut ValidatedParams, param: &EndpointParam, rendered: String) {
    match param.location {
        ParamLocation::Path => {
            validated.path.insert(param.name.clone(), rendered);
        }
        ParamLocation::Query => validated.query.push((param.name.clone(), rendered)),
    }
}

impl<T> Clone for Endpoint<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            path: self.path.clone(),
            version: self.version,
            method: self.method,
            mandatory_params: self.mandatory_params.clone(),
            optional_params: self.optional_params.clone(),
            response_shape: self.response_shape,
            fallback_field: self.fallback_field.clone(),
            _record: PhantomData,
        }
    }
}

impl<T> Debug for Endpoint<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("name", &self.name)
            .field("path", &self.path)
            .field("version", &self.version)
            .field("method", &self.method)
            .field("mandatory_params", &self.mandatory_params)
            .field("optional_params", &self.optional_params)
            .field("response_shape", &self.response_shape)
            .field("fallback_field", &self.fallback_field)
            .finish()
    }
}
