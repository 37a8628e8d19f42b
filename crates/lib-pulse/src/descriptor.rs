//! Sequence descriptor parser.
//!
//! Accepts the two fixed sequence forms as a single line of text:
//!
//! ```text
//! fid  pulse=10us  spacing=40us samples=2048 delay=1s
//! cpmg pulse=113us spacing=2ms  echoes=32    samples=200 delay=0
//! ```
//!
//! Durations are signed integers with an optional unit suffix (`cycles`,
//! `us`, `ms`, `s`); a bare number is a cycle count. Negative durations
//! parse so that the compiler can reject them with a sequence error.
//! `samples` and `delay` are optional.

use crate::error::{CompileError, CompileResult};
use lib_types::sequence::PulseSequence;
use lib_types::units::Timebase;
use nom::{
    branch::alt,
    bytes::complete::{tag, tag_no_case, take_while1},
    character::complete::{char, digit1, multispace0, multispace1},
    combinator::{opt, recognize},
    sequence::pair,
    IResult, Parser,
};

/// Default FID capture length.
pub const DEFAULT_FID_SAMPLES: u32 = 2048;

/// Default per-echo capture length for CPMG.
pub const DEFAULT_CPMG_SAMPLES: u32 = 100;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Kind {
    Fid,
    Cpmg,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Unit {
    Cycles,
    Micros,
    Millis,
    Seconds,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Value {
    magnitude: i64,
    unit: Unit,
}

#[derive(Default)]
struct Fields {
    pulse: Option<(usize, Value)>,
    spacing: Option<(usize, Value)>,
    echoes: Option<(usize, Value)>,
    samples: Option<(usize, Value)>,
    delay: Option<(usize, Value)>,
}

/// Parse a descriptor into a [`PulseSequence`], converting durations to
/// cycles of `timebase`.
pub fn parse_descriptor(text: &str, timebase: &Timebase) -> CompileResult<PulseSequence> {
    let offset = |rest: &str| text.len() - rest.len();

    let (mut input, kind) = parse_kind(text).map_err(|e| nom_error(text, e, "expected `fid` or `cpmg`"))?;
    let mut fields = Fields::default();

    loop {
        let (rest, _) = multispace0::<_, nom::error::Error<&str>>(input)
            .map_err(|e| nom_error(text, e, "whitespace"))?;
        if rest.is_empty() {
            break;
        }
        let position = offset(rest);
        let (rest, (key, value)) = parse_field(rest)
            .map_err(|e| nom_error(text, e, "expected `key=value`"))?;
        if !rest.is_empty() && !rest.starts_with(char::is_whitespace) {
            return Err(CompileError::descriptor(offset(rest), "unexpected characters after value"));
        }

        let slot = match (kind, key.to_ascii_lowercase().as_str()) {
            (_, "pulse") => &mut fields.pulse,
            (_, "spacing") => &mut fields.spacing,
            (Kind::Cpmg, "echoes") => &mut fields.echoes,
            (_, "samples") => &mut fields.samples,
            (_, "delay") => &mut fields.delay,
            _ => {
                return Err(CompileError::descriptor(
                    position,
                    format!("unknown key `{}`", key),
                ))
            }
        };
        if slot.is_some() {
            return Err(CompileError::descriptor(position, format!("duplicate key `{}`", key)));
        }
        *slot = Some((position, value));
        input = rest;
    }

    let end = text.len();
    let pulse_width = duration(required(fields.pulse, "pulse", end)?, timebase);
    let echo_spacing = duration(required(fields.spacing, "spacing", end)?, timebase);
    let repetition_delay = fields.delay.map(|v| duration(v, timebase)).unwrap_or(0);

    let sequence = match kind {
        Kind::Fid => PulseSequence::Fid {
            pulse_width,
            echo_spacing,
            repetition_delay,
            samples: fields
                .samples
                .map(|v| count(v, "samples"))
                .transpose()?
                .unwrap_or(DEFAULT_FID_SAMPLES),
        },
        Kind::Cpmg => PulseSequence::Cpmg {
            pulse_width,
            echo_spacing,
            echo_count: count(required(fields.echoes, "echoes", end)?, "echoes")?,
            repetition_delay,
            samples: fields
                .samples
                .map(|v| count(v, "samples"))
                .transpose()?
                .unwrap_or(DEFAULT_CPMG_SAMPLES),
        },
    };

    tracing::debug!(descriptor = text, ?sequence, "parsed sequence descriptor");
    Ok(sequence)
}

fn required(field: Option<(usize, Value)>, name: &str, end: usize) -> CompileResult<(usize, Value)> {
    field.ok_or_else(|| CompileError::descriptor(end, format!("missing required key `{}`", name)))
}

fn duration((_, value): (usize, Value), timebase: &Timebase) -> i64 {
    match value.unit {
        Unit::Cycles => value.magnitude,
        Unit::Micros => timebase.cycles_from_us(value.magnitude),
        Unit::Millis => timebase.cycles_from_ms(value.magnitude),
        Unit::Seconds => timebase.cycles_from_secs(value.magnitude),
    }
}

fn count((position, value): (usize, Value), name: &str) -> CompileResult<u32> {
    if value.unit != Unit::Cycles {
        return Err(CompileError::descriptor(position, format!("`{}` is a count and takes no unit", name)));
    }
    u32::try_from(value.magnitude).map_err(|_| {
        CompileError::descriptor(
            position,
            format!("`{}` must be a non-negative count, got {}", name, value.magnitude),
        )
    })
}

fn nom_error(text: &str, err: nom::Err<nom::error::Error<&str>>, expected: &str) -> CompileError {
    match err {
        nom::Err::Incomplete(_) => CompileError::descriptor(text.len(), "incomplete descriptor"),
        nom::Err::Error(e) | nom::Err::Failure(e) => {
            CompileError::descriptor(text.len() - e.input.len(), expected)
        }
    }
}

// ============================================================================
// Grammar
// ============================================================================

fn parse_kind(input: &str) -> IResult<&str, Kind> {
    let (input, _) = multispace0(input)?;
    let (input, kind) = alt((tag_no_case("cpmg"), tag_no_case("fid"))).parse(input)?;
    let kind = if kind.eq_ignore_ascii_case("fid") { Kind::Fid } else { Kind::Cpmg };
    // A bare kind is valid syntax; missing keys are reported afterwards.
    if input.trim().is_empty() {
        return Ok(("", kind));
    }
    let (input, _) = multispace1(input)?;
    Ok((input, kind))
}

fn parse_field(input: &str) -> IResult<&str, (&str, Value)> {
    let (input, key) = take_while1(|c: char| c.is_ascii_alphabetic() || c == '_')(input)?;
    let (input, _) = char('=')(input)?;
    let (input, value) = parse_value(input)?;
    Ok((input, (key, value)))
}

fn parse_value(input: &str) -> IResult<&str, Value> {
    let start = input;
    let (input, digits) = recognize(pair(opt(char('-')), digit1)).parse(input)?;
    let magnitude: i64 = digits.parse().map_err(|_| {
        nom::Err::Failure(nom::error::Error::new(start, nom::error::ErrorKind::Digit))
    })?;
    let (input, unit) = opt(alt((tag("cycles"), tag("us"), tag("ms"), tag("s")))).parse(input)?;
    let unit = match unit {
        None | Some("cycles") => Unit::Cycles,
        Some("us") => Unit::Micros,
        Some("ms") => Unit::Millis,
        _ => Unit::Seconds,
    };
    Ok((input, Value { magnitude, unit }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> CompileResult<PulseSequence> {
        parse_descriptor(text, &Timebase::default())
    }

    #[test]
    fn test_parse_fid() {
        let seq = parse("fid pulse=10us spacing=40us samples=2048 delay=1s").unwrap();
        assert_eq!(
            seq,
            PulseSequence::Fid {
                pulse_width: 1_250,
                echo_spacing: 5_000,
                repetition_delay: 125_000_000,
                samples: 2048,
            }
        );
    }

    #[test]
    fn test_parse_cpmg_with_defaults() {
        let seq = parse("  CPMG  pulse=113us spacing=2ms echoes=32 ").unwrap();
        assert_eq!(
            seq,
            PulseSequence::Cpmg {
                pulse_width: 14_125,
                echo_spacing: 250_000,
                echo_count: 32,
                repetition_delay: 0,
                samples: DEFAULT_CPMG_SAMPLES,
            }
        );
    }

    #[test]
    fn test_bare_numbers_are_cycles() {
        let seq = parse("fid pulse=1250 spacing=5000cycles").unwrap();
        assert_eq!(seq.pulse_width(), 1_250);
        assert_eq!(seq.echo_spacing(), 5_000);
        assert_eq!(seq.samples_per_window(), DEFAULT_FID_SAMPLES);
    }

    #[test]
    fn test_negative_duration_parses() {
        let seq = parse("fid pulse=-10us spacing=40us").unwrap();
        assert_eq!(seq.pulse_width(), -1_250);
    }

    #[test]
    fn test_errors() {
        assert!(matches!(parse("spin-echo pulse=1"), Err(CompileError::Descriptor { position: 0, .. })));
        assert!(matches!(
            parse("fid pulse=10us spacing=40us echoes=3"),
            Err(CompileError::Descriptor { position: 28, .. })
        ));
        assert!(matches!(
            parse("fid pulse=10us pulse=20us spacing=40us"),
            Err(CompileError::Descriptor { .. })
        ));
        assert!(matches!(parse("cpmg pulse=10us spacing=2ms"), Err(CompileError::Descriptor { .. })));
        assert!(matches!(
            parse("cpmg pulse=10us spacing=2ms echoes=-1"),
            Err(CompileError::Descriptor { .. })
        ));
        assert!(matches!(
            parse("cpmg pulse=10us spacing=2ms echoes=4ms"),
            Err(CompileError::Descriptor { .. })
        ));
        assert!(matches!(parse("fid pulse=10xs spacing=40us"), Err(CompileError::Descriptor { .. })));
    }
}
