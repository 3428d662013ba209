//! File-name templating for exported packages and bundles.
//!
//! Output names are rendered from an [`AppRef`] with user-configured [upon]
//! templates (`{{ variable }}`, `{{ value|formatter }}`), extended with:
//!
//! - **`slug`**: converts strings to URL-safe slugs.
//! - **`sanitize`**: replaces characters that are not allowed in file names.
//! - **`truncate`**: truncates strings to a maximum byte length at a character
//!   boundary, usable as either `truncate(value, n)` or `{{ value|truncate: n }}`.
//!
//! # Template Variables
//!
//! | Variable        | Type     | Description                                 |
//! |-----------------|----------|---------------------------------------------|
//! | `name`          | `String` | Application label, already sanitized        |
//! | `package`       | `String` | Package name (`com.example.app`)            |
//! | `version.name`  | `String` | Human-readable version                      |
//! | `version.code`  | `i64`    | Version code                                |
//! | `date.year`     | `String` | Four-digit year of the export               |
//! | `date.month`    | `String` | Two-digit month                             |
//! | `date.day`      | `String` | Two-digit day                               |
//! | `date.hour`     | `String` | Two-digit hour (24h)                        |
//! | `date.minute`   | `String` | Two-digit minute                            |
//! | `date.second`   | `String` | Two-digit second                            |
//! | `sequence`      | `u64`    | 1-based position of the item in its batch   |
//!
//! The rendered name never contains an extension; callers append one.

use crate::candidate::AppRef;
use crate::error::{Error, ErrorKind, Result};
use exn::ResultExt;
use std::str::FromStr;
use time::OffsetDateTime;
use tracing::instrument;
use upon::{Engine, Template};

/// Characters that no backend accepts in a file name.
const ILLEGAL: [char; 9] = ['/', '\\', ':', '*', '?', '"', '<', '>', '|'];
/// Longest name we produce, in bytes, leaving room for numbering and extension.
const MAX_NAME_BYTES: usize = 200;

/// Compiled file-name template.
///
/// Constructed via [`FromStr`], which compiles the template eagerly so that
/// syntax errors surface at creation time rather than at render time.
pub struct NameTemplate {
    engine: Engine<'static>,
    template: Template<'static>,
}
impl FromStr for NameTemplate {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let mut engine = Engine::new();
        addons::configure(&mut engine);
        let template = engine.compile(s.to_string()).or_raise(|| ErrorKind::Template)?;
        Ok(Self { engine, template })
    }
}
impl NameTemplate {
    /// Renders the template for `app`, exported at `at` as item `sequence`
    /// (1-based) of its batch.
    #[instrument(level = "debug", skip_all, fields(package = %app.package))]
    pub fn render(&self, app: &AppRef, at: OffsetDateTime, sequence: usize) -> Result<String> {
        let name = self
            .template
            .render(&self.engine, Self::parameters(app, at, sequence))
            .to_string()
            .or_raise(|| ErrorKind::Template)?;
        let name = sanitize(&name);
        if name.is_empty() {
            exn::bail!(ErrorKind::Template);
        }
        Ok(name)
    }

    /// Renders and appends `extension` (with or without its leading dot).
    pub fn render_with_ext(&self, app: &AppRef, at: OffsetDateTime, sequence: usize, extension: &str) -> Result<String> {
        let name = self.render(app, at, sequence)?;
        Ok(format!("{name}.{}", extension.trim().trim_start_matches('.')))
    }

    fn parameters(app: &AppRef, at: OffsetDateTime, sequence: usize) -> upon::Value {
        upon::value! {
            name: sanitize(&app.name),
            package: &app.package,
            version: upon::value! {
                name: &app.version_name,
                code: app.version_code,
            },
            date: upon::value! {
                year: format!("{:04}", at.year()),
                month: format!("{:02}", u8::from(at.month())),
                day: format!("{:02}", at.day()),
                hour: format!("{:02}", at.hour()),
                minute: format!("{:02}", at.minute()),
                second: format!("{:02}", at.second()),
            },
            sequence: sequence as u64,
        }
    }
}

/// Current local time, falling back to UTC when the local offset cannot be
/// determined (as on multi-threaded Unix processes).
pub fn local_now() -> OffsetDateTime {
    OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc())
}

/// Make `s` usable as a single file name: illegal and control characters
/// become `_`, surrounding whitespace and trailing dots are dropped, and the
/// result is capped at a character boundary.
#[must_use]
pub fn sanitize(s: &str) -> String {
    let replaced: String = s.chars().map(|c| if ILLEGAL.contains(&c) || c.is_control() { '_' } else { c }).collect();
    let trimmed = replaced.trim().trim_end_matches('.').trim_end();
    trimmed[..trimmed.floor_char_boundary(MAX_NAME_BYTES)].to_string()
}

/// Custom [`upon`] extensions for name-safe string manipulation.
mod addons {
    use rslug::slugify;
    use std::fmt::Write;
    use upon::{Engine, Value, fmt as upon_fmt};

    fn slug_formatter(f: &mut upon_fmt::Formatter<'_>, value: &Value) -> upon_fmt::Result {
        match value {
            Value::String(s) => write!(f, "{}", slugify!(s))?,
            v => upon_fmt::default(f, v)?,
        };
        Ok(())
    }

    fn sanitize_formatter(f: &mut upon_fmt::Formatter<'_>, value: &Value) -> upon_fmt::Result {
        match value {
            Value::String(s) => write!(f, "{}", super::sanitize(s))?,
            v => upon_fmt::default(f, v)?,
        };
        Ok(())
    }

    fn truncate_to_char_boundary(s: &str, max_bytes: usize) -> String {
        s[..s.floor_char_boundary(max_bytes)].to_string()
    }

    pub(crate) fn configure(engine: &mut Engine<'_>) {
        engine.add_formatter("slug", slug_formatter);
        engine.add_formatter("sanitize", sanitize_formatter);
        engine.add_function("truncate", truncate_to_char_boundary);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use apkport_storage::StorageLocation;
    use rstest::rstest;
    use time::macros::datetime;

    fn app(name: &str) -> AppRef {
        AppRef {
            name: name.to_string(),
            package: "com.example.app".to_string(),
            version_name: "1.2.3".to_string(),
            version_code: 42,
            package_file: StorageLocation::direct("/data/app/base.apk"),
            splits: vec![],
        }
    }

    #[rstest]
    #[case("{{ package }}-{{ version.code }}", "com.example.app-42")]
    #[case("{{ name }}_{{ version.name }}", "My App_1.2.3")]
    #[case("{{ name|slug }}", "my-app")]
    #[case("{{ date.year }}{{ date.month }}{{ date.day }}-{{ date.hour }}{{ date.minute }}{{ date.second }}", "20240305-070809")]
    #[case("{{ sequence }}-{{ package }}", "3-com.example.app")]
    #[case("{{ truncate(package, 3) }}", "com")]
    #[case("{{ package|truncate: 11 }}", "com.example")]
    fn test_render(#[case] template: &str, #[case] expected: &str) {
        let template: NameTemplate = template.parse().unwrap();
        let at = datetime!(2024-03-05 07:08:09 UTC);
        assert_eq!(template.render(&app("My App"), at, 3).unwrap(), expected);
    }

    #[test]
    fn test_name_is_sanitized() {
        let template: NameTemplate = "{{ name }}".parse().unwrap();
        let at = datetime!(2024-01-01 00:00:00 UTC);
        assert_eq!(template.render(&app("Bad/Name: v2?"), at, 1).unwrap(), "Bad_Name_ v2_");
    }

    #[test]
    fn test_literal_separators_cannot_escape() {
        let template: NameTemplate = "../{{ package }}".parse().unwrap();
        let at = datetime!(2024-01-01 00:00:00 UTC);
        assert_eq!(template.render(&app("x"), at, 1).unwrap(), ".._com.example.app");
    }

    #[test]
    fn test_render_with_ext() {
        let template: NameTemplate = "{{ package }}".parse().unwrap();
        let at = datetime!(2024-01-01 00:00:00 UTC);
        assert_eq!(template.render_with_ext(&app("x"), at, 1, ".apk").unwrap(), "com.example.app.apk");
        assert_eq!(template.render_with_ext(&app("x"), at, 1, "zip").unwrap(), "com.example.app.zip");
    }

    #[test]
    fn test_empty_render_fails() {
        let template: NameTemplate = "{{ name }}".parse().unwrap();
        let at = datetime!(2024-01-01 00:00:00 UTC);
        assert!(template.render(&app("  "), at, 1).is_err());
    }

    #[test]
    fn test_invalid_template() {
        assert!("{{ unclosed".parse::<NameTemplate>().is_err());
    }

    #[rstest]
    #[case("plain", "plain")]
    #[case("  spaced  ", "spaced")]
    #[case("dots...", "dots")]
    #[case("a\tb", "a_b")]
    fn test_sanitize(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(sanitize(input), expected);
    }
}
