//! Utility functions for common operations.
//!
//! This module provides reusable utilities for:
//!
//! - **URL validation**: scheme checks for feed URLs and links found inside feeds
//! - **Text processing**: markup stripping, entity decoding and excerpt truncation
//!
//! # Examples
//!
//! ```
//! use journal_feed::util::{sanitize_link, sanitize_text};
//!
//! assert_eq!(sanitize_text("<b>Hello</b> world", 500), "Hello world");
//! assert_eq!(sanitize_link("javascript:alert(1)"), "");
//! ```

mod text;
mod url_validator;

pub use text::{
    decode_entities, excerpt, first_img_src, sanitize_text, strip_control_chars, strip_markup,
    take_chars,
};
pub use url_validator::{sanitize_link, validate_feed_url, UrlValidationError};
