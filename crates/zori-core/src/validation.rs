//! Field-level input validation for the auth and project forms.
//!
//! Validation failures are values, not errors: callers render them next to
//! the offending field and never send the request.

use std::fmt;

use crate::models::{
    CreateProjectRequest, LoginRequest, RecoverConfirmRequest, RecoverRequest, RegisterRequest,
    UpdateProjectRequest,
};

/// Minimum password length accepted by the server on registration.
pub const MIN_PASSWORD_LEN: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationErrors {
    errors: Vec<FieldError>,
}

impl ValidationErrors {
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FieldError> {
        self.errors.iter()
    }

    /// First message recorded for `field`.
    pub fn get(&self, field: &str) -> Option<&str> {
        self.errors
            .iter()
            .find(|e| e.field == field)
            .map(|e| e.message.as_str())
    }

    fn push(&mut self, field: &'static str, message: impl Into<String>) {
        self.errors.push(FieldError {
            field,
            message: message.into(),
        });
    }

    fn require(&mut self, field: &'static str, value: &str, label: &str) -> bool {
        if value.trim().is_empty() {
            self.push(field, format!("{label} is required"));
            return false;
        }
        true
    }

    fn into_result(self) -> Result<(), ValidationErrors> {
        if self.is_empty() { Ok(()) } else { Err(self) }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, err) in self.errors.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{err}")?;
        }
        Ok(())
    }
}

/// Loose `local@domain.tld` shape check; the server does the real work.
fn is_email(value: &str) -> bool {
    let value = value.trim();
    let Some((local, domain)) = value.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && !value.chars().any(char::is_whitespace)
        && domain
            .split_once('.')
            .is_some_and(|(host, tld)| !host.is_empty() && !tld.is_empty() && !tld.ends_with('.'))
}

fn is_http_url(value: &str) -> bool {
    url::Url::parse(value.trim())
        .is_ok_and(|u| matches!(u.scheme(), "http" | "https") && u.host_str().is_some())
}

fn check_email(errors: &mut ValidationErrors, email: &str) {
    if errors.require("email", email, "Email") && !is_email(email) {
        errors.push("email", "Please enter a valid email address");
    }
}

fn check_new_password(errors: &mut ValidationErrors, field: &'static str, password: &str) {
    if errors.require(field, password, "Password") && password.chars().count() < MIN_PASSWORD_LEN {
        errors.push(
            field,
            format!("Password must be at least {MIN_PASSWORD_LEN} characters"),
        );
    }
}

fn check_website(errors: &mut ValidationErrors, website_url: &str) {
    if !is_http_url(website_url) {
        errors.push("website_url", "Please enter a valid http(s) URL");
    }
}

/// # Errors
/// Returns every field problem found.
pub fn validate_login(req: &LoginRequest) -> Result<(), ValidationErrors> {
    let mut errors = ValidationErrors::default();
    check_email(&mut errors, &req.email);
    errors.require("password", &req.password, "Password");
    errors.into_result()
}

/// # Errors
/// Returns every field problem found.
pub fn validate_register(req: &RegisterRequest) -> Result<(), ValidationErrors> {
    let mut errors = ValidationErrors::default();
    check_email(&mut errors, &req.email);
    check_new_password(&mut errors, "password", &req.password);
    errors.require("organization_name", &req.organization_name, "Organization name");
    errors.into_result()
}

/// # Errors
/// Returns every field problem found.
pub fn validate_recover(req: &RecoverRequest) -> Result<(), ValidationErrors> {
    let mut errors = ValidationErrors::default();
    check_email(&mut errors, &req.email);
    errors.into_result()
}

/// # Errors
/// Returns every field problem found.
pub fn validate_recover_confirm(req: &RecoverConfirmRequest) -> Result<(), ValidationErrors> {
    let mut errors = ValidationErrors::default();
    errors.require("token", &req.token, "Recovery token");
    check_new_password(&mut errors, "password", &req.password);
    errors.into_result()
}

/// # Errors
/// Returns every field problem found.
pub fn validate_create_project(req: &CreateProjectRequest) -> Result<(), ValidationErrors> {
    let mut errors = ValidationErrors::default();
    errors.require("name", &req.name, "Project name");
    if errors.require("website_url", &req.website_url, "Website URL") {
        check_website(&mut errors, &req.website_url);
    }
    errors.into_result()
}

/// # Errors
/// Returns every field problem found.
pub fn validate_update_project(req: &UpdateProjectRequest) -> Result<(), ValidationErrors> {
    let mut errors = ValidationErrors::default();
    if let Some(name) = &req.name {
        errors.require("name", name, "Project name");
    }
    if let Some(website_url) = req.website_url.as_deref().filter(|s| !s.trim().is_empty()) {
        check_website(&mut errors, website_url);
    }
    errors.into_result()
}
