//! Kubernetes quantity strings (`100m`, `1`, `128Mi`, `1.5Gi`, `2e3`).

use nom::{
    branch::alt,
    character::complete::{char, digit0, digit1, one_of},
    combinator::{all_consuming, map, opt, recognize, value},
    error::{ContextError, ParseError},
    sequence::preceded,
    IResult, Parser,
};

const MIB: f64 = 1024.0 * 1024.0;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Suffix {
    /// Power of 1024 (`Ki` = 1)
    Binary(i32),
    /// Power of 10 (`m` = -3, `k` = 3, `e6` = 6)
    Decimal(i32),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quantity {
    number: f64,
    suffix: Suffix,
}

impl Quantity {
    pub fn millicores(&self) -> f64 {
        match self.suffix {
            Suffix::Decimal(exp) => self.number * 10f64.powi(exp + 3),
            Suffix::Binary(exp) => self.number * 1024f64.powi(exp) * 1000.0,
        }
    }

    pub fn mebibytes(&self) -> f64 {
        match self.suffix {
            Suffix::Decimal(exp) => self.number * 10f64.powi(exp) / MIB,
            Suffix::Binary(exp) => self.number * 1024f64.powi(exp - 2),
        }
    }
}

/// Sign, integer digits and fraction digits, e.g. `-1.5`, `0.25`, `.5`, `3.`
fn number<'a, E: ParseError<&'a str> + ContextError<&'a str>>(
    s: &'a str,
) -> IResult<&'a str, f64, E> {
    map(
        (
            opt(one_of("+-")),
            alt((
                (digit1, opt(preceded(char('.'), digit0))),
                map(
                    preceded(char('.'), digit1),
                    |frac: &'a str| -> (&'a str, Option<&'a str>) { ("0", Some(frac)) },
                ),
            )),
        ),
        |(sign, (int, frac)): (Option<char>, (&str, Option<&str>))| {
            let frac = frac.filter(|f| !f.is_empty()).unwrap_or("0");
            let n = format!("{}.{}", int, frac).parse::<f64>().unwrap_or_default();

            if sign == Some('-') {
                -n
            } else {
                n
            }
        },
    )
    .parse(s)
}

fn binary_suffix<'a, E: ParseError<&'a str> + ContextError<&'a str>>(
    s: &'a str,
) -> IResult<&'a str, Suffix, E> {
    map(
        (
            alt((
                value(1, char('K')),
                value(2, char('M')),
                value(3, char('G')),
                value(4, char('T')),
                value(5, char('P')),
                value(6, char('E')),
            )),
            char('i'),
        ),
        |(exp, _)| Suffix::Binary(exp),
    )
    .parse(s)
}

fn exponent<'a, E: ParseError<&'a str> + ContextError<&'a str>>(
    s: &'a str,
) -> IResult<&'a str, Suffix, E> {
    map(
        preceded(one_of("eE"), recognize((opt(one_of("+-")), digit1))),
        |exp: &str| {
            let exp = exp
                .parse::<i64>()
                .map(|e| e.clamp(-400, 400) as i32)
                .unwrap_or_default();

            Suffix::Decimal(exp)
        },
    )
    .parse(s)
}

fn decimal_suffix<'a, E: ParseError<&'a str> + ContextError<&'a str>>(
    s: &'a str,
) -> IResult<&'a str, Suffix, E> {
    alt((
        value(Suffix::Decimal(-9), char('n')),
        value(Suffix::Decimal(-6), char('u')),
        value(Suffix::Decimal(-3), char('m')),
        value(Suffix::Decimal(3), char('k')),
        value(Suffix::Decimal(6), char('M')),
        value(Suffix::Decimal(9), char('G')),
        value(Suffix::Decimal(12), char('T')),
        value(Suffix::Decimal(15), char('P')),
        value(Suffix::Decimal(18), char('E')),
    ))
    .parse(s)
}

fn quantity<'a, E: ParseError<&'a str> + ContextError<&'a str>>(
    s: &'a str,
) -> IResult<&'a str, Quantity, E> {
    map(
        (
            number,
            opt(alt((binary_suffix, exponent, decimal_suffix))),
        ),
        |(number, suffix)| Quantity {
            number,
            suffix: suffix.unwrap_or(Suffix::Decimal(0)),
        },
    )
    .parse(s)
}

pub fn parse_quantity(s: &str) -> Option<Quantity> {
    all_consuming(quantity::<nom::error::Error<&str>>)
        .parse(s.trim())
        .ok()
        .map(|(_, q)| q)
}

/// CPU in millicores. Unparsable or empty values are 0.
pub fn cpu_millicores(s: &str) -> f64 {
    parse_quantity(s).map(|q| q.millicores()).unwrap_or(0.0)
}

/// Memory or storage size in MiB. Unparsable or empty values are 0.
pub fn memory_mib(s: &str) -> f64 {
    parse_quantity(s).map(|q| q.mebibytes()).unwrap_or(0.0)
}
