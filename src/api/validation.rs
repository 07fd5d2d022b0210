//! Input validation for API requests.
//!
//! For collecting several failures into one response, combine these with
//! `ValidationErrorBuilder` from the `error` module.

use lazy_static::lazy_static;
use regex::Regex;

use super::error::ValidationErrorBuilder;
use crate::db::{CreateHolidayRequest, CreateUserRequest, RegisterRequest, UpdateUserRequest};

lazy_static! {
    /// Loose address check: something@something.tld
    static ref EMAIL_REGEX: Regex = Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").unwrap();

    /// Role machine names: lowercase words joined by underscores
    static ref ROLE_NAME_REGEX: Regex = Regex::new(r"^[a-z][a-z0-9_]*$").unwrap();
}

pub const MIN_PASSWORD_LEN: usize = 6;

pub fn validate_email(email: &str) -> Result<(), String> {
    let email = email.trim();
    if email.is_empty() {
        return Err("Email is required".to_string());
    }
    if email.len() > 254 {
        return Err("Email is too long (max 254 characters)".to_string());
    }
    if !EMAIL_REGEX.is_match(email) {
        return Err("Invalid email address".to_string());
    }
    Ok(())
}

pub fn validate_password(password: &str) -> Result<(), String> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LEN
        ));
    }
    Ok(())
}

/// Trimmed length within `[min, max]` characters
pub fn validate_length(label: &str, value: &str, min: usize, max: usize) -> Result<(), String> {
    let len = value.trim().chars().count();
    if len < min {
        if min == 1 {
            return Err(format!("{} is required", label));
        }
        return Err(format!("{} must be at least {} characters", label, min));
    }
    if len > max {
        return Err(format!("{} is too long (max {} characters)", label, max));
    }
    Ok(())
}

pub fn validate_role_name(name: &str) -> Result<(), String> {
    validate_length("Role name", name, 3, 50)?;
    if !ROLE_NAME_REGEX.is_match(name.trim()) {
        return Err(
            "Role name must be lowercase letters, digits and underscores, starting with a letter"
                .to_string(),
        );
    }
    Ok(())
}

pub fn validate_register(req: &RegisterRequest) -> ValidationErrorBuilder {
    let mut errors = ValidationErrorBuilder::new();
    errors
        .check("email", validate_email(&req.email))
        .check("password", validate_password(&req.password))
        .check("firstName", validate_length("First name", &req.first_name, 1, 100))
        .check("lastName", validate_length("Last name", &req.last_name, 1, 100));
    errors
}

pub fn validate_create_user(req: &CreateUserRequest) -> ValidationErrorBuilder {
    let mut errors = ValidationErrorBuilder::new();
    errors
        .check("email", validate_email(&req.email))
        .check("password", validate_password(&req.password))
        .check("firstName", validate_length("First name", &req.first_name, 1, 100))
        .check("lastName", validate_length("Last name", &req.last_name, 1, 100));
    errors
}

pub fn validate_update_user(req: &UpdateUserRequest) -> ValidationErrorBuilder {
    let mut errors = ValidationErrorBuilder::new();
    if let Some(email) = &req.email {
        errors.check("email", validate_email(email));
    }
    if let Some(password) = &req.password {
        errors.check("password", validate_password(password));
    }
    if let Some(first_name) = &req.first_name {
        errors.check("firstName", validate_length("First name", first_name, 1, 100));
    }
    if let Some(last_name) = &req.last_name {
        errors.check("lastName", validate_length("Last name", last_name, 1, 100));
    }
    errors
}

pub fn validate_holiday(req: &CreateHolidayRequest) -> ValidationErrorBuilder {
    let mut errors = ValidationErrorBuilder::new();
    errors
        .check("name", validate_length("Holiday name", &req.name, 1, 100))
        .check(
            "description",
            validate_length("Description", &req.description, 1, 500),
        );
    errors
}
