//! Filename templates used to locate a file inside a catalog directory.
//!
//! Templates mix literal text, `*` globs and two placeholders:
//! `{inittime:<strftime>}` for the reference time and `{fh}` / `{fh:03d}`
//! for the forecast hour, e.g. `{inittime:%y%m%d%H}.{fh:03d}`.

use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, FixedOffset};
use regex::Regex;
use std::fmt;
use std::str::FromStr;

use crate::error::{MdfsError, MdfsResult};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Glob,
    Time(String),
    ForecastHour { width: usize, zero_pad: bool },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilenamePattern {
    source: String,
    segments: Vec<Segment>,
}

impl FilenamePattern {
    pub fn parse(template: &str) -> MdfsResult<Self> {
        let invalid = |reason: &str| MdfsError::InvalidPattern {
            pattern: template.to_string(),
            reason: reason.to_string(),
        };

        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = template.char_indices();
        while let Some((start, c)) = chars.next() {
            match c {
                '*' => {
                    flush(&mut literal, &mut segments);
                    segments.push(Segment::Glob);
                }
                '{' => {
                    flush(&mut literal, &mut segments);
                    let end = template[start..]
                        .find('}')
                        .map(|i| start + i)
                        .ok_or_else(|| invalid("unclosed '{'"))?;
                    segments.push(placeholder(&template[start + 1..end]).map_err(|r| invalid(&r))?);
                    // Skip to the closing brace.
                    for (i, _) in chars.by_ref() {
                        if i == end {
                            break;
                        }
                    }
                }
                '}' => return Err(invalid("unmatched '}'")),
                c => literal.push(c),
            }
        }
        flush(&mut literal, &mut segments);

        if segments.is_empty() {
            return Err(invalid("empty template"));
        }
        Ok(Self {
            source: template.to_string(),
            segments,
        })
    }

    /// Infers a template from an existing file name in the catalog.
    ///
    /// Recognized shapes, tried in order: `YYYYMMDDhhmmss.FFF`,
    /// `YYMMDDhh.FFF`, `YYYYMMDD[._]hhmmss`, `YYYYMMDD[._]hhmm` and a bare
    /// `YYYYMMDDhhmmss`. Text around the timestamp is kept literally.
    pub fn guess(latest: &str) -> MdfsResult<Self> {
        let rules: [(&str, fn(&regex::Captures<'_>) -> Vec<Segment>); 5] = [
            (r"^(.*)(\d{14})\.(\d{3})(.*)$", |c| {
                vec![
                    lit(&c[1]),
                    Segment::Time("%Y%m%d%H%M%S".into()),
                    lit("."),
                    fh3(),
                    lit(&c[4]),
                ]
            }),
            (r"^(.*)(\d{8})\.(\d{3})$", |c| {
                vec![
                    lit(&c[1]),
                    Segment::Time("%y%m%d%H".into()),
                    lit("."),
                    fh3(),
                ]
            }),
            (r"^(.*)(\d{8})([._])(\d{6})(.*)$", |c| {
                vec![
                    lit(&c[1]),
                    Segment::Time("%Y%m%d".into()),
                    lit(&c[3]),
                    Segment::Time("%H%M%S".into()),
                    lit(&c[5]),
                ]
            }),
            (r"^(.*)(\d{8})([._])(\d{4})(.*)$", |c| {
                vec![
                    lit(&c[1]),
                    Segment::Time("%Y%m%d".into()),
                    lit(&c[3]),
                    Segment::Time("%H%M".into()),
                    lit(&c[5]),
                ]
            }),
            (r"^(.*)(\d{14})(.*)$", |c| {
                vec![
                    lit(&c[1]),
                    Segment::Time("%Y%m%d%H%M%S".into()),
                    lit(&c[3]),
                ]
            }),
        ];

        for (rule, build) in rules {
            let re = Regex::new(rule).map_err(|e| MdfsError::InvalidPattern {
                pattern: rule.to_string(),
                reason: e.to_string(),
            })?;
            if let Some(caps) = re.captures(latest) {
                let segments: Vec<Segment> = build(&caps)
                    .into_iter()
                    .filter(|s| !matches!(s, Segment::Literal(l) if l.is_empty()))
                    .collect();
                let source = segments.iter().map(Segment::to_string).collect();
                return Ok(Self { source, segments });
            }
        }

        Err(MdfsError::InvalidPattern {
            pattern: latest.to_string(),
            reason: "no known timestamp layout in file name".to_string(),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn has_glob(&self) -> bool {
        self.segments.contains(&Segment::Glob)
    }

    /// Substitutes time and forecast hour; globs stay in the output.
    pub fn render(&self, time: &DateTime<FixedOffset>, forecast_hour: u32) -> MdfsResult<RenderedName> {
        let mut text = String::new();
        let mut regex = String::from("^");
        for segment in &self.segments {
            let part = match segment {
                Segment::Literal(l) => l.clone(),
                Segment::Glob => {
                    text.push('*');
                    regex.push_str(".*");
                    continue;
                }
                Segment::Time(fmt) => time.format(fmt).to_string(),
                Segment::ForecastHour { width, zero_pad: true } => {
                    format!("{:0width$}", forecast_hour, width = *width)
                }
                Segment::ForecastHour { width, zero_pad: false } => {
                    format!("{:width$}", forecast_hour, width = *width)
                }
            };
            regex.push_str(&regex::escape(&part));
            text.push_str(&part);
        }
        regex.push('$');

        let matcher = Regex::new(&regex).map_err(|e| MdfsError::InvalidPattern {
            pattern: self.source.clone(),
            reason: e.to_string(),
        })?;
        Ok(RenderedName {
            text,
            glob: self.has_glob(),
            matcher,
        })
    }
}

impl FromStr for FilenamePattern {
    type Err = MdfsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for FilenamePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(l) => f.write_str(l),
            Self::Glob => f.write_str("*"),
            Self::Time(fmt) => write!(f, "{{inittime:{fmt}}}"),
            Self::ForecastHour { width: 0, .. } => f.write_str("{fh}"),
            Self::ForecastHour { width, zero_pad } => {
                write!(f, "{{fh:{}{}d}}", if *zero_pad { "0" } else { "" }, width)
            }
        }
    }
}

/// A rendered template: either an exact file name or a glob over names.
#[derive(Debug, Clone)]
pub struct RenderedName {
    text: String,
    glob: bool,
    matcher: Regex,
}

impl RenderedName {
    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn is_exact(&self) -> bool {
        !self.glob
    }

    pub fn matches(&self, name: &str) -> bool {
        self.matcher.is_match(name)
    }

    /// The rendered text with glob characters removed, used to rank candidates.
    pub(crate) fn stem(&self) -> String {
        self.text.replace('*', "")
    }
}

fn flush(literal: &mut String, segments: &mut Vec<Segment>) {
    if !literal.is_empty() {
        segments.push(Segment::Literal(std::mem::take(literal)));
    }
}

fn lit(s: &str) -> Segment {
    Segment::Literal(s.to_string())
}

fn fh3() -> Segment {
    Segment::ForecastHour {
        width: 3,
        zero_pad: true,
    }
}

fn placeholder(inner: &str) -> Result<Segment, String> {
    let (name, spec) = match inner.split_once(':') {
        Some((name, spec)) => (name.trim(), Some(spec)),
        None => (inner.trim(), None),
    };
    match name {
        "inittime" => {
            let fmt = spec.ok_or("inittime needs a strftime format")?;
            if StrftimeItems::new(fmt).any(|item| matches!(item, Item::Error)) {
                return Err(format!("invalid strftime format {fmt:?}"));
            }
            Ok(Segment::Time(fmt.to_string()))
        }
        "fh" => {
            let spec = spec.unwrap_or("");
            if spec.is_empty() {
                return Ok(Segment::ForecastHour {
                    width: 0,
                    zero_pad: false,
                });
            }
            let digits = spec
                .strip_suffix('d')
                .ok_or_else(|| format!("unsupported fh format {spec:?}"))?;
            let zero_pad = digits.starts_with('0');
            let width = digits
                .parse::<usize>()
                .map_err(|_| format!("unsupported fh format {spec:?}"))?;
            Ok(Segment::ForecastHour { width, zero_pad })
        }
        other => Err(format!("unknown placeholder {other:?}")),
    }
}
