//! Parser for the device lines of a kernel configuration file.
//!
//! ```text
//! # comment
//! mainbus0 at root
//! cpu*     at mainbus?
//! isa0     at mainbus?
//! com0     at isa? port 0x3f8 irq 4
//! com*     at isa? port ? irq ? flags 0x1 disable
//! wm*      at pci? dev ? function ?
//! ```
//!
//! A device line names the driver and unit (`*` for any), the parent
//! (`root`, or a bus driver with a unit or `?`), the locators, an optional
//! flags word, and an optional `disable`. Names are resolved against the
//! attachments the kernel was built with, so the resulting rows can be fed
//! straight to [`ConfigTable::new`].
//!
//! [`ConfigTable::new`]: crate::cfdata::ConfigTable::new
use autoconf_core::attach_args::{BusClass, LocValue, Locator, LOC_WILDCARD};
use thiserror::Error;

use crate::cfdata::{CfAttach, CfData, CfUnit};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("line {line}: {kind}")]
pub struct ParseError {
    pub line: usize,
    pub kind: ParseErrorKind,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseErrorKind {
    #[error("expected {0}")]
    Expected(&'static str),
    #[error("unexpected '{0}'")]
    Unexpected(String),
    #[error("'{0}' is not a device name with a unit")]
    BadDeviceSpec(String),
    #[error("'{0}' is not a bus")]
    UnknownBus(String),
    #[error("driver '{name}' has no attachment at '{bus}'")]
    UnknownAttachment { name: String, bus: BusClass },
    #[error("'{bus}' has no locator '{locator}'")]
    UnknownLocator { bus: BusClass, locator: String },
    #[error("invalid number '{0}'")]
    BadNumber(String),
    #[error("locator '{0}' is given more than once")]
    DuplicateLocator(&'static str),
}

/// Parse `src` into configuration rows, in file order.
///
/// Locator lists are allocated once and live for the rest of the
/// program, like the ones of a compiled-in table.
pub fn parse(src: &str, attachments: &[CfAttach]) -> Result<Vec<CfData>, ParseError> {
    src.lines()
        .enumerate()
        .filter_map(|(i, line)| {
            let line = line.split('#').next().unwrap_or("").trim();
            (!line.is_empty()).then(|| (i + 1, line))
        })
        .map(|(line_no, line)| {
            parse_line(line, attachments).map_err(|kind| ParseError {
                line: line_no,
                kind,
            })
        })
        .collect()
}

fn parse_line(line: &str, attachments: &[CfAttach]) -> Result<CfData, ParseErrorKind> {
    let mut tokens = line.split_whitespace();

    let (name, unit) = split_unit(tokens.next().ok_or(ParseErrorKind::Expected("a device"))?)?;
    let unit = match unit {
        "*" => CfUnit::Star,
        n => CfUnit::Fixed(
            n.parse()
                .map_err(|_| ParseErrorKind::BadDeviceSpec(format!("{name}{n}")))?,
        ),
    };

    match tokens.next() {
        Some("at") => {}
        Some(t) => return Err(ParseErrorKind::Unexpected(t.to_owned())),
        None => return Err(ParseErrorKind::Expected("'at'")),
    }

    let parent_spec = tokens.next().ok_or(ParseErrorKind::Expected("a parent"))?;
    let (at, parent, parent_unit) = if parent_spec == "root" {
        (BusClass::Root, None, None)
    } else {
        let (parent, unit) = split_unit(parent_spec)?;
        let bus: BusClass = parent
            .parse()
            .map_err(|_| ParseErrorKind::UnknownBus(parent.to_owned()))?;
        let unit = match unit {
            "?" => None,
            n => Some(
                n.parse()
                    .map_err(|_| ParseErrorKind::BadDeviceSpec(parent_spec.to_owned()))?,
            ),
        };
        (bus, Some(bus.as_str()), unit)
    };

    let ca = attachments
        .iter()
        .find(|ca| ca.name == name && ca.bus == at)
        .ok_or_else(|| ParseErrorKind::UnknownAttachment {
            name: name.to_owned(),
            bus: at,
        })?;

    let mut cf = CfData::new(ca.name, at, unit);
    cf.parent = parent;
    cf.parent_unit = parent_unit;

    let mut locators = Vec::new();
    while let Some(token) = tokens.next() {
        match token {
            "disable" => cf.disabled = true,
            "flags" => {
                let value = tokens.next().ok_or(ParseErrorKind::Expected("a flags value"))?;
                cf.flags = u32::try_from(parse_number(value)?)
                    .map_err(|_| ParseErrorKind::BadNumber(value.to_owned()))?;
            }
            locator => {
                let name = at
                    .locator_names()
                    .iter()
                    .copied()
                    .find(|&n| n == locator)
                    .ok_or_else(|| ParseErrorKind::UnknownLocator {
                        bus: at,
                        locator: locator.to_owned(),
                    })?;
                if locators.iter().any(|l: &Locator| l.name == name) {
                    return Err(ParseErrorKind::DuplicateLocator(name));
                }
                let value = tokens.next().ok_or(ParseErrorKind::Expected("a locator value"))?;
                let value = match value {
                    "?" => LOC_WILDCARD,
                    v => parse_number(v)?,
                };
                locators.push(Locator::new(name, value));
            }
        }
    }
    if !locators.is_empty() {
        cf.locators = Vec::leak(locators);
    }

    Ok(cf)
}

/// Split `com0`, `com*`, or `isa?` into the name and the unit part.
fn split_unit(spec: &str) -> Result<(&str, &str), ParseErrorKind> {
    let at = spec
        .find(|c: char| c.is_ascii_digit() || c == '*' || c == '?')
        .filter(|&i| i > 0)
        .ok_or_else(|| ParseErrorKind::BadDeviceSpec(spec.to_owned()))?;
    Ok(spec.split_at(at))
}

fn parse_number(s: &str) -> Result<LocValue, ParseErrorKind> {
    let (negative, digits) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s),
    };
    let magnitude = match digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
        Some(hex) => LocValue::from_str_radix(hex, 16),
        None => digits.parse(),
    }
    .map_err(|_| ParseErrorKind::BadNumber(s.to_owned()))?;
    Ok(if negative { -magnitude } else { magnitude })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        autoconf::{AttachContext, ProbeContext},
        cfdata::ConfigTable,
    };
    use assert_matches::assert_matches;
    use autoconf_core::{attach_args::AttachArgs, error::AttachError};
    use core::any::Any;

    fn never(_: &ProbeContext<'_>, _: &CfData, _: &AttachArgs) -> u32 {
        0
    }

    fn fail(_: &mut AttachContext<'_>, _: &AttachArgs) -> Result<Box<dyn Any + Send>, AttachError> {
        Err(AttachError::NotSupported)
    }

    static ATTACH: &[CfAttach] = &[
        CfAttach::register("mainbus", BusClass::Root, never, fail, 0),
        CfAttach::register("isa", BusClass::Mainbus, never, fail, 0),
        CfAttach::register("cpu", BusClass::Mainbus, never, fail, 0),
        CfAttach::register("pci", BusClass::Mainbus, never, fail, 0),
        CfAttach::register("com", BusClass::Isa, never, fail, 0),
        CfAttach::register("wm", BusClass::Pci, never, fail, 0),
    ];

    #[test]
    fn parse_device_lines() {
        let rows = parse(
            "# a machine\n\
             mainbus0 at root\n\
             \n\
             cpu*     at mainbus?   # any number of them\n\
             isa0     at mainbus0\n\
             com0     at isa? port 0x3f8 irq 4\n\
             com*     at isa? port ? irq -1 flags 0x10 disable\n\
             wm*      at pci? dev 3 function ?\n",
            ATTACH,
        )
        .unwrap();

        assert_eq!(rows.len(), 6);
        assert_eq!(rows[0], CfData::new("mainbus", BusClass::Root, CfUnit::Fixed(0)));
        assert_eq!(
            rows[1],
            CfData::new("cpu", BusClass::Mainbus, CfUnit::Star).parent("mainbus", None)
        );
        assert_eq!(rows[2].parent_unit, Some(0));
        assert_eq!(
            rows[3].locators,
            [Locator::new("port", 0x3f8), Locator::new("irq", 4)]
        );
        assert_eq!(rows[4].unit, CfUnit::Star);
        assert_eq!(rows[4].flags, 0x10);
        assert!(rows[4].disabled);
        assert_eq!(rows[4].locator("port"), Some(LOC_WILDCARD));
        assert_eq!(rows[4].locator("irq"), Some(LOC_WILDCARD));
        assert_eq!(rows[5].locator("dev"), Some(3));

        ConfigTable::new(ATTACH, &rows).unwrap();
    }

    #[test]
    fn display_parses_back() {
        let src = "com0 at isa? port 0x3f8 irq 0x4 flags 0x1";
        let rows = parse(src, ATTACH).unwrap();
        assert_eq!(rows[0].to_string(), src);
        assert_eq!(parse(&rows[0].to_string(), ATTACH).unwrap(), rows);
    }

    #[test]
    fn negative_locators_parse_back() {
        let rows = parse("com0 at isa? port ? irq -2 drq -0x10", ATTACH).unwrap();
        assert_eq!(rows[0].to_string(), "com0 at isa? port ? irq -2 drq -16");
        assert_eq!(parse(&rows[0].to_string(), ATTACH).unwrap(), rows);
    }

    #[test]
    fn errors() {
        let err = |src| parse(src, ATTACH).unwrap_err();
        assert_eq!(
            err("mainbus0 at root\ncom0 on isa?"),
            ParseError {
                line: 2,
                kind: ParseErrorKind::Unexpected("on".to_owned())
            }
        );
        assert_matches!(err("com at isa?").kind, ParseErrorKind::BadDeviceSpec(_));
        assert_matches!(err("com0 at eisa?").kind, ParseErrorKind::UnknownBus(_));
        assert_matches!(
            err("com0 at pci?").kind,
            ParseErrorKind::UnknownAttachment { bus: BusClass::Pci, .. }
        );
        assert_matches!(
            err("com0 at isa? slot 1").kind,
            ParseErrorKind::UnknownLocator { .. }
        );
        assert_matches!(err("com0 at isa? port 0xzz").kind, ParseErrorKind::BadNumber(_));
        assert_matches!(err("com0 at isa? port").kind, ParseErrorKind::Expected(_));
        assert_matches!(err("com0 at isa? flags -1").kind, ParseErrorKind::BadNumber(_));
        assert_eq!(
            err("cpu0 at mainbus?\n\ncpu0").to_string(),
            "line 3: expected 'at'"
        );
    }

    #[test]
    fn locator_given_twice() {
        let err = parse("com0 at isa? port 0x3f8 irq 4 port 0x2f8", ATTACH).unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::DuplicateLocator("port"));
        assert_eq!(
            err.to_string(),
            "line 1: locator 'port' is given more than once"
        );

        // A wildcard counts too
        assert_matches!(
            parse("com0 at isa? irq ? irq 3", ATTACH),
            Err(ParseError {
                kind: ParseErrorKind::DuplicateLocator("irq"),
                ..
            })
        );
    }
}
