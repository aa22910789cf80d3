//! `User-Agent` string sent with every request

use std::env::consts::{ARCH, OS};
use std::fmt;
use std::sync::LazyLock;

use http::HeaderValue;
use regex::Regex;

use crate::error::HttpError;

/// Product token at the start of the user agent
pub const PRODUCT: &str = "QiniuRust";

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Version of the compiler that built this crate, e.g. `rustc/1.85.0`
pub const RUSTC_VERSION: &str = env!("QINIU_RUSTC_VERSION");

static APP_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_ \-.]*$").expect("valid app name pattern"));

/// Build identifier: `QiniuRust/<version> (<os>; <arch>; <app-name>) rustc/<version>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserAgent(String);

impl Default for UserAgent {
    fn default() -> Self {
        Self::format("")
    }
}

impl UserAgent {
    /// User agent naming the calling application
    ///
    /// `app_name` may only contain ASCII letters, digits, `_`, ` `, `-` and `.`.
    pub fn with_app_name(app_name: &str) -> Result<Self, HttpError> {
        if !APP_NAME.is_match(app_name) {
            return Err(HttpError::Build(format!(
                "Invalid application name '{}': only [A-Za-z0-9_ -.] are allowed",
                app_name
            )));
        }
        Ok(Self::format(app_name))
    }

    fn format(app_name: &str) -> Self {
        Self(format!(
            "{}/{} ({}; {}; {}) {}",
            PRODUCT, VERSION, OS, ARCH, app_name, RUSTC_VERSION
        ))
    }

    /// The user agent string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub(crate) fn header_value(&self) -> Result<HeaderValue, HttpError> {
        HeaderValue::from_str(&self.0).map_err(|e| HttpError::Construction(e.to_string()))
    }
}

impl fmt::Display for UserAgent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
