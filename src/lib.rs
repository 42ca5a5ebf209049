//! rxforms – the templating and schema-mapping core behind the pricing
//! administration screens.
//!
//! The admin handlers (list, filter, create, update, clone, soft-delete) are
//! thin I/O glue around a few pieces of logic that every one of them reuses:
//! * [`template`] – a small text template language with sections, inverted
//!   sections and variables, used to render HTML fragments for the HTMX client.
//! * [`schema`] – normalizes flat, parent-linked configuration rows into an
//!   ordered category → (subcategory) → field tree.
//! * [`mapper`] – translates between that tree, flat form submissions and the
//!   nested JSON values stored per record, and renders form and summary markup.
//! * [`naming`] – composes human readable names from selected labels and
//!   makes them unique against existing records.
//!
//! Supporting modules:
//! * [`cache`] – an explicitly passed, byte-bounded cache of template text.
//! * [`settings`] – layered configuration through the `config` crate.
//! * [`error`] – the crate error type.
//!
//! ## Quick Start
//! ```
//! use rxforms::schema::{ConfigRow, RowLevel, SchemaTree};
//! use rxforms::mapper::{build_from_form, generate_display_html};
//! use std::collections::HashMap;
//!
//! let schema = SchemaTree::from_rows(&[
//!     ConfigRow::new(RowLevel::Category, "brand", "Brand", 1, None),
//!     ConfigRow::new(RowLevel::Field, "awp_discount", "AWP Discount", 1, Some("brand")),
//! ]);
//! let mut form = HashMap::new();
//! form.insert("brand__awp_discount".to_string(), "18".to_string());
//! let values = build_from_form(&form, &schema);
//! assert!(generate_display_html(&schema, &values).contains("18%"));
//! ```
//!
//! ## Known limitations
//! Substituted template values are not rescanned for directives, so rendering
//! a rendered text again is not equivalent to rendering once. Name uniqueness
//! is advisory; the store must enforce it.

pub mod cache;
pub mod error;
pub mod mapper;
pub mod naming;
pub mod schema;
pub mod settings;
pub mod template;

pub use error::{Result, RxformsError};
