//! Human readable, unique names composed from selected labels.
//!
//! A base name is the selected labels joined by `" | "` followed by the year,
//! e.g. `CVS | Standard | <10K | 1 Year - 2025`. Names are capped at
//! [`MAX_NAME_LENGTH`] characters. Uniqueness is checked against a
//! [`NameRegistry`] by appending ` (2)`, ` (3)`, ... until a free name is
//! found. The check is advisory: two callers racing on the same labels can
//! pick the same name, so the store must enforce uniqueness itself.

use std::collections::HashMap;
use std::future::Future;
use std::sync::RwLock;

use chrono::{Datelike, Local, NaiveDate};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{Result, RxformsError};

pub const MAX_NAME_LENGTH: usize = 255;
pub const LABEL_DELIMITER: &str = " | ";
pub const ELLIPSIS: &str = "...";
/// Counter suffixes tried before giving up.
pub const DEFAULT_MAX_ATTEMPTS: usize = 100;

/// Answers whether a name is already taken, ignoring the record `exclude_id`.
pub trait NameRegistry {
    fn exists(&self, name: &str, exclude_id: Option<&str>) -> impl Future<Output = Result<bool>> + Send;
}

/// Adapts a synchronous closure into a registry.
pub struct FnRegistry<F>(pub F);

impl<F> NameRegistry for FnRegistry<F>
where
    F: Fn(&str, Option<&str>) -> Result<bool> + Sync,
{
    fn exists(&self, name: &str, exclude_id: Option<&str>) -> impl Future<Output = Result<bool>> + Send {
        std::future::ready((self.0)(name, exclude_id))
    }
}

/// Names kept in memory by record id. Lookups ignore case and surrounding whitespace.
#[derive(Debug, Default)]
pub struct MemoryNameRegistry {
    names: RwLock<HashMap<String, String>>,
}

fn normalize(name: &str) -> String {
    name.trim().to_lowercase()
}

impl MemoryNameRegistry {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn insert(&self, id: impl Into<String>, name: &str) -> Result<()> {
        self.names.write()?.insert(id.into(), normalize(name));
        Ok(())
    }
    pub fn remove(&self, id: &str) -> Result<bool> {
        Ok(self.names.write()?.remove(id).is_some())
    }
    pub fn len(&self) -> Result<usize> {
        Ok(self.names.read()?.len())
    }
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.names.read()?.is_empty())
    }
    fn contains(&self, name: &str, exclude_id: Option<&str>) -> Result<bool> {
        let wanted = normalize(name);
        let names = self.names.read()?;
        Ok(names.iter().any(|(id, n)| *n == wanted && Some(id.as_str()) != exclude_id))
    }
}

impl NameRegistry for MemoryNameRegistry {
    fn exists(&self, name: &str, exclude_id: Option<&str>) -> impl Future<Output = Result<bool>> + Send {
        std::future::ready(self.contains(name, exclude_id))
    }
}

/// What to do when every counter suffix is taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExhaustionPolicy {
    /// Return the last candidate tried and log a warning.
    #[default]
    Accept,
    /// Fail with [`RxformsError::NameExhausted`].
    Reject,
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

fn take_chars(s: &str, n: usize) -> &str {
    match s.char_indices().nth(n) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Joins the non-empty labels and appends the year of `effective_date`
/// (or the current year), truncating to [`MAX_NAME_LENGTH`] characters.
pub fn compose_base_name<S: AsRef<str>>(labels: &[S], effective_date: Option<NaiveDate>) -> String {
    let year = effective_date.map(|d| d.year()).unwrap_or_else(|| Local::now().year());
    let suffix = format!(" - {}", year);
    let parts: Vec<&str> = labels.iter().map(|l| l.as_ref().trim()).filter(|l| !l.is_empty()).collect();
    let name = format!("{}{}", parts.join(LABEL_DELIMITER), suffix);
    if char_len(&name) <= MAX_NAME_LENGTH {
        return name;
    }
    if parts.len() > 4 {
        let n = parts.len();
        let kept = [parts[0], parts[1], ELLIPSIS, parts[n - 2], parts[n - 1]].join(LABEL_DELIMITER);
        let shortened = format!("{}{}", kept, suffix);
        if char_len(&shortened) <= MAX_NAME_LENGTH {
            return shortened;
        }
        // the kept labels alone are too long, cut them and keep the year
        let room = MAX_NAME_LENGTH.saturating_sub(char_len(&suffix) + ELLIPSIS.len());
        return format!("{}{}{}", take_chars(&kept, room), ELLIPSIS, suffix);
    }
    format!("{}{}", take_chars(&name, MAX_NAME_LENGTH - ELLIPSIS.len()), ELLIPSIS)
}

/// `base (counter)`, shortening `base` so the result fits the length cap.
fn with_counter(base: &str, counter: usize) -> String {
    let suffix = format!(" ({})", counter);
    let room = MAX_NAME_LENGTH.saturating_sub(char_len(&suffix));
    format!("{}{}", take_chars(base, room), suffix)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NameGenerator {
    max_attempts: usize,
    exhaustion: ExhaustionPolicy,
}

impl Default for NameGenerator {
    fn default() -> Self {
        Self { max_attempts: DEFAULT_MAX_ATTEMPTS, exhaustion: ExhaustionPolicy::Accept }
    }
}

impl NameGenerator {
    pub fn new(max_attempts: usize, exhaustion: ExhaustionPolicy) -> Self {
        Self { max_attempts, exhaustion }
    }

    /// `base` if it is free, otherwise the first free `base (n)` for n = 2, 3, ...
    /// Registry errors are returned as they are.
    pub async fn unique_name<R: NameRegistry>(&self, base: &str, registry: &R, exclude_id: Option<&str>) -> Result<String> {
        if !registry.exists(base, exclude_id).await? {
            return Ok(base.to_string());
        }
        let mut candidate = base.to_string();
        for counter in 2..self.max_attempts.saturating_add(2) {
            candidate = with_counter(base, counter);
            if !registry.exists(&candidate, exclude_id).await? {
                debug!(%candidate, counter, "resolved name collision");
                return Ok(candidate);
            }
        }
        match self.exhaustion {
            ExhaustionPolicy::Accept => {
                warn!(%base, %candidate, attempts = self.max_attempts, "no free name found, using last candidate");
                Ok(candidate)
            }
            ExhaustionPolicy::Reject => Err(RxformsError::NameExhausted { base: base.to_string(), attempts: self.max_attempts }),
        }
    }
}

/// [`NameGenerator::unique_name`] with the default attempt limit and policy.
pub async fn generate_unique_name<R: NameRegistry>(base: &str, registry: &R, exclude_id: Option<&str>) -> Result<String> {
    NameGenerator::default().unique_name(base, registry, exclude_id).await
}
