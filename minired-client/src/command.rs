//! # Command Encoding
//!
//! Purpose: Turn command templates (`"SET %s %b"`) or pre-split argument
//! lists into RESP multi-bulk requests queued on an outbound buffer.
//!
//! ## Design Principles
//! 1. **All or Nothing**: Arguments are collected first and the encoded size
//!    is reserved up front; a bad template or a failed allocation leaves the
//!    outbound queue untouched.
//! 2. **Shell-Lite Splitting**: Unquoted spaces separate arguments; a single
//!    quote toggles a raw span where spaces are literal.
//! 3. **Binary-Safe**: `%b` and `append_argv` copy bytes verbatim.
//! 4. **Typed Arguments**: `Arg` replaces varargs; a placeholder given the
//!    wrong kind of argument is a `Format` error.
//!
//! ## Placeholders
//!
//! ```text
//! %s   text or bytes           %b   bytes (length-prefixed, binary safe)
//! %%   literal percent
//! %[#0- +][width][.prec][hh|h|l|ll](d|i|o|u|x|X)   integer
//! %[#0- +][width][.prec](e|E|f|F|g|G|a|A)          float (%a takes no precision)
//! ```

use std::fmt::Write as _;
use std::mem;

use minired_common::{Error, GrowBuffer, Result};

/// One argument consumed by a template placeholder.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Arg<'a> {
    Str(&'a str),
    Bytes(&'a [u8]),
    Int(i64),
    Uint(u64),
    Float(f64),
}

impl<'a> From<&'a str> for Arg<'a> {
    fn from(value: &'a str) -> Self {
        Arg::Str(value)
    }
}

impl<'a> From<&'a String> for Arg<'a> {
    fn from(value: &'a String) -> Self {
        Arg::Str(value)
    }
}

impl<'a> From<&'a [u8]> for Arg<'a> {
    fn from(value: &'a [u8]) -> Self {
        Arg::Bytes(value)
    }
}

impl<'a, const N: usize> From<&'a [u8; N]> for Arg<'a> {
    fn from(value: &'a [u8; N]) -> Self {
        Arg::Bytes(value)
    }
}

impl<'a> From<&'a Vec<u8>> for Arg<'a> {
    fn from(value: &'a Vec<u8>) -> Self {
        Arg::Bytes(value)
    }
}

macro_rules! int_arg {
    ($variant:ident, $cast:ty, $($t:ty),*) => {
        $(impl From<$t> for Arg<'_> {
            fn from(value: $t) -> Self {
                Arg::$variant(value as $cast)
            }
        })*
    };
}

int_arg!(Int, i64, i8, i16, i32, i64, isize);
int_arg!(Uint, u64, u8, u16, u32, u64, usize);

impl From<f64> for Arg<'_> {
    fn from(value: f64) -> Self {
        Arg::Float(value)
    }
}

impl From<f32> for Arg<'_> {
    fn from(value: f32) -> Self {
        Arg::Float(value as f64)
    }
}

/// Encodes a template into a standalone RESP request.
pub fn format_command(template: &str, args: &[Arg<'_>]) -> Result<Vec<u8>> {
    let argv = split_template(template, args)?;
    let mut out = Vec::with_capacity(encoded_len(&argv));
    encode_into(&argv, |chunk| {
        out.extend_from_slice(chunk);
        Ok(())
    })?;
    Ok(out)
}

/// Outbound request queue with a pipeline depth counter.
#[derive(Debug, Default)]
pub struct CommandWriter {
    outbound: GrowBuffer,
    depth: usize,
}

impl CommandWriter {
    pub fn new() -> Self {
        CommandWriter::default()
    }

    /// Formats `template` and queues the encoded command.
    pub fn append(&mut self, template: &str, args: &[Arg<'_>]) -> Result<()> {
        let argv = split_template(template, args)?;
        self.push_encoded(&argv)
    }

    /// Queues a command from already-split arguments.
    pub fn append_argv<A: AsRef<[u8]>>(&mut self, argv: &[A]) -> Result<()> {
        if argv.is_empty() {
            return Err(Error::Format("empty command".into()));
        }
        self.push_encoded(argv)
    }

    fn push_encoded<A: AsRef<[u8]>>(&mut self, argv: &[A]) -> Result<()> {
        self.outbound.ensure_free(encoded_len(argv))?;
        let outbound = &mut self.outbound;
        encode_into(argv, |chunk| outbound.append(chunk))?;
        self.depth += 1;
        Ok(())
    }

    /// Commands queued since the last flush.
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Encoded bytes waiting to be written.
    pub fn pending(&self) -> &[u8] {
        self.outbound.as_bytes()
    }

    pub fn is_empty(&self) -> bool {
        self.outbound.is_empty()
    }

    /// Drops queued bytes and resets the depth; capacity is kept.
    pub fn clear(&mut self) {
        self.outbound.clear();
        self.depth = 0;
    }
}

fn encoded_len<A: AsRef<[u8]>>(argv: &[A]) -> usize {
    let mut scratch = [0u8; 20];
    let mut total = 1 + decimal(argv.len(), &mut scratch).len() + 2;
    for arg in argv {
        let len = arg.as_ref().len();
        total += 1 + decimal(len, &mut scratch).len() + 2 + len + 2;
    }
    total
}

fn encode_into<A, F>(argv: &[A], mut emit: F) -> Result<()>
where
    A: AsRef<[u8]>,
    F: FnMut(&[u8]) -> Result<()>,
{
    let mut scratch = [0u8; 20];
    emit(b"*")?;
    emit(decimal(argv.len(), &mut scratch))?;
    emit(b"\r\n")?;
    for arg in argv {
        let arg = arg.as_ref();
        emit(b"$")?;
        emit(decimal(arg.len(), &mut scratch))?;
        emit(b"\r\n")?;
        emit(arg)?;
        emit(b"\r\n")?;
    }
    Ok(())
}

/// Renders `value` in base 10 into the tail of `buf`.
fn decimal(mut value: usize, buf: &mut [u8; 20]) -> &[u8] {
    let mut start = buf.len();
    loop {
        start -= 1;
        buf[start] = b'0' + (value % 10) as u8;
        value /= 10;
        if value == 0 {
            break;
        }
    }
    &buf[start..]
}

/// Splits a template into arguments, expanding placeholders.
fn split_template(template: &str, args: &[Arg<'_>]) -> Result<Vec<Vec<u8>>> {
    let bytes = template.as_bytes();
    let mut args = args.iter();
    let mut argv = Vec::new();
    let mut current = Vec::new();
    let mut touched = false;
    let mut quoted = false;
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i];
        if c != b'%' || quoted || i + 1 == bytes.len() {
            match c {
                b'\'' => quoted = !quoted,
                b' ' if !quoted => {
                    if touched {
                        argv.push(mem::take(&mut current));
                        touched = false;
                    }
                }
                _ => {
                    current.push(c);
                    touched = true;
                }
            }
            i += 1;
            continue;
        }

        match bytes[i + 1] {
            b's' | b'b' => {
                let placeholder = bytes[i + 1] as char;
                match next_arg(&mut args, placeholder)? {
                    Arg::Str(s) => current.extend_from_slice(s.as_bytes()),
                    Arg::Bytes(b) => current.extend_from_slice(b),
                    other => return Err(mismatch(placeholder, other)),
                }
                i += 2;
            }
            b'%' => {
                current.push(b'%');
                i += 2;
            }
            _ => {
                let (conversion, used) = Conversion::parse(&bytes[i + 1..])?;
                let arg = next_arg(&mut args, conversion.conv as char)?;
                conversion.render(arg, &mut current)?;
                i += 1 + used;
            }
        }
        touched = true;
    }

    if touched {
        argv.push(current);
    }
    if args.next().is_some() {
        return Err(Error::Format("more arguments than placeholders".into()));
    }
    if argv.is_empty() {
        return Err(Error::Format("empty command".into()));
    }
    Ok(argv)
}

fn next_arg<'a, 'b>(
    args: &mut std::slice::Iter<'b, Arg<'a>>,
    placeholder: char,
) -> Result<Arg<'a>> {
    args.next()
        .copied()
        .ok_or_else(|| Error::Format(format!("missing argument for %{}", placeholder)))
}

fn mismatch(placeholder: char, arg: Arg<'_>) -> Error {
    Error::Format(format!("%{} cannot format {:?}", placeholder, arg))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Length {
    Default,
    Char,
    Short,
    Long,
}

/// Parsed printf-style conversion.
#[derive(Debug, Clone, Copy)]
struct Conversion {
    alternate: bool,
    zero_pad: bool,
    left: bool,
    space: bool,
    plus: bool,
    width: usize,
    precision: Option<usize>,
    length: Length,
    conv: u8,
}

const INT_CONVS: &[u8] = b"diouxX";
const FLOAT_CONVS: &[u8] = b"eEfFgGaA";

impl Conversion {
    /// Parses the text after `%`. Returns the conversion and bytes consumed.
    fn parse(text: &[u8]) -> Result<(Conversion, usize)> {
        let mut p = 0;
        let flag = |ch: u8, p: &mut usize| {
            if text.get(*p) == Some(&ch) {
                *p += 1;
                true
            } else {
                false
            }
        };
        // Flags are accepted once each, in this order.
        let alternate = flag(b'#', &mut p);
        let zero_pad = flag(b'0', &mut p);
        let left = flag(b'-', &mut p);
        let space = flag(b' ', &mut p);
        let plus = flag(b'+', &mut p);

        let width = parse_number(text, &mut p)?.unwrap_or(0);
        let precision = if text.get(p) == Some(&b'.') {
            p += 1;
            Some(parse_number(text, &mut p)?.unwrap_or(0))
        } else {
            None
        };

        let (length, conv) = match (text.get(p), text.get(p + 1)) {
            (Some(&c), _) if INT_CONVS.contains(&c) || FLOAT_CONVS.contains(&c) => (Length::Default, c),
            (Some(b'h'), Some(b'h')) => (Length::Char, int_conv(text.get(p + 2))?),
            (Some(b'h'), _) => (Length::Short, int_conv(text.get(p + 1))?),
            (Some(b'l'), Some(b'l')) => (Length::Long, int_conv(text.get(p + 2))?),
            (Some(b'l'), _) => (Length::Long, int_conv(text.get(p + 1))?),
            _ => return Err(invalid_conversion(text.get(p))),
        };
        p += match (length, text.get(p + 1)) {
            (Length::Default, _) => 1,
            (Length::Char, _) => 3,
            (Length::Long, Some(b'l')) => 3,
            _ => 2,
        };

        if matches!(conv, b'a' | b'A') && precision.is_some() {
            return Err(Error::Format("%a does not take a precision".into()));
        }

        Ok((
            Conversion {
                alternate,
                zero_pad,
                left,
                space,
                plus,
                width,
                precision,
                length,
                conv,
            },
            p,
        ))
    }

    fn render(&self, arg: Arg<'_>, out: &mut Vec<u8>) -> Result<()> {
        let conv = self.conv as char;
        if INT_CONVS.contains(&self.conv) {
            let value = match arg {
                Arg::Int(v) => v as i128,
                Arg::Uint(v) => v as i128,
                other => return Err(mismatch(conv, other)),
            };
            self.render_int(value, out);
        } else {
            let value = match arg {
                Arg::Float(v) => v,
                other => return Err(mismatch(conv, other)),
            };
            self.render_float(value, out);
        }
        Ok(())
    }

    fn render_int(&self, value: i128, out: &mut Vec<u8>) {
        let signed = matches!(self.conv, b'd' | b'i');
        let value = narrow(value, self.length, signed);
        let negative = value < 0;
        let magnitude = value.unsigned_abs();

        let mut digits = match self.conv {
            b'o' => format!("{:o}", magnitude),
            b'x' => format!("{:x}", magnitude),
            b'X' => format!("{:X}", magnitude),
            _ => magnitude.to_string(),
        };
        if let Some(precision) = self.precision {
            if precision == 0 && magnitude == 0 {
                digits.clear();
            } else if digits.len() < precision {
                digits.insert_str(0, &"0".repeat(precision - digits.len()));
            }
        }

        let mut prefix = String::new();
        if signed {
            if negative {
                prefix.push('-');
            } else if self.plus {
                prefix.push('+');
            } else if self.space {
                prefix.push(' ');
            }
        }
        if self.alternate {
            match self.conv {
                b'o' if !digits.starts_with('0') => digits.insert(0, '0'),
                b'x' if magnitude != 0 => prefix.push_str("0x"),
                b'X' if magnitude != 0 => prefix.push_str("0X"),
                _ => {}
            }
        }

        let zero_pad = self.zero_pad && self.precision.is_none();
        self.pad(&prefix, &digits, zero_pad, out);
    }

    fn render_float(&self, value: f64, out: &mut Vec<u8>) {
        let upper = self.conv.is_ascii_uppercase();
        let mut prefix = String::new();
        if value.is_sign_negative() && !value.is_nan() {
            prefix.push('-');
        } else if self.plus {
            prefix.push('+');
        } else if self.space {
            prefix.push(' ');
        }

        let abs = value.abs();
        if !abs.is_finite() {
            let body = match (abs.is_nan(), upper) {
                (true, false) => "nan",
                (true, true) => "NAN",
                (false, false) => "inf",
                (false, true) => "INF",
            };
            self.pad(&prefix, body, false, out);
            return;
        }

        let precision = self.precision.unwrap_or(6);
        let mut body = match self.conv.to_ascii_lowercase() {
            b'f' => {
                let mut s = format!("{:.*}", precision, abs);
                if self.alternate && precision == 0 {
                    s.push('.');
                }
                s
            }
            b'e' => exp_notation(abs, precision, self.alternate),
            b'g' => self.general(abs),
            _ => {
                prefix.push_str(if upper { "0X" } else { "0x" });
                hex_float(abs, self.alternate)
            }
        };
        if upper {
            body.make_ascii_uppercase();
        }
        self.pad(&prefix, &body, self.zero_pad, out);
    }

    /// `%g`: shortest of fixed and exponent notation for the precision.
    fn general(&self, abs: f64) -> String {
        let precision = match self.precision {
            Some(0) => 1,
            Some(p) => p,
            None => 6,
        };
        let exponent = if abs == 0.0 {
            0
        } else {
            split_exp(&format!("{:.*e}", precision - 1, abs)).1
        };
        let mut s = if exponent < precision as i32 && exponent >= -4 {
            let decimals = (precision as i32 - 1 - exponent) as usize;
            format!("{:.*}", decimals, abs)
        } else {
            exp_notation(abs, precision - 1, self.alternate)
        };
        if !self.alternate {
            strip_fraction_zeros(&mut s);
        }
        s
    }

    fn pad(&self, prefix: &str, body: &str, zero_pad: bool, out: &mut Vec<u8>) {
        let len = prefix.len() + body.len();
        let fill = self.width.saturating_sub(len);
        if self.left {
            out.extend_from_slice(prefix.as_bytes());
            out.extend_from_slice(body.as_bytes());
            out.resize(out.len() + fill, b' ');
        } else if zero_pad {
            out.extend_from_slice(prefix.as_bytes());
            out.resize(out.len() + fill, b'0');
            out.extend_from_slice(body.as_bytes());
        } else {
            out.resize(out.len() + fill, b' ');
            out.extend_from_slice(prefix.as_bytes());
            out.extend_from_slice(body.as_bytes());
        }
    }
}

fn parse_number(text: &[u8], p: &mut usize) -> Result<Option<usize>> {
    let start = *p;
    let mut value: usize = 0;
    while let Some(&d) = text.get(*p).filter(|d| d.is_ascii_digit()) {
        value = value
            .checked_mul(10)
            .and_then(|v| v.checked_add((d - b'0') as usize))
            .ok_or_else(|| Error::Format("width or precision too large".into()))?;
        *p += 1;
    }
    Ok((*p > start).then_some(value))
}

fn int_conv(c: Option<&u8>) -> Result<u8> {
    match c {
        Some(&c) if INT_CONVS.contains(&c) => Ok(c),
        other => Err(invalid_conversion(other)),
    }
}

fn invalid_conversion(c: Option<&u8>) -> Error {
    match c {
        Some(&c) => Error::Format(format!("invalid conversion specifier {:?}", c as char)),
        None => Error::Format("unterminated conversion specifier".into()),
    }
}

/// `hh` and `h` narrow the argument like printf; other lengths keep 64 bits.
fn narrow(value: i128, length: Length, signed: bool) -> i128 {
    match (length, signed) {
        (Length::Char, true) => value as i8 as i128,
        (Length::Char, false) => value as u8 as i128,
        (Length::Short, true) => value as i16 as i128,
        (Length::Short, false) => value as u16 as i128,
        (_, true) => value as i64 as i128,
        (_, false) => value as u64 as i128,
    }
}

/// C-style `%e`: `d.ddde[+-]XX`.
fn exp_notation(abs: f64, precision: usize, alternate: bool) -> String {
    let rendered = format!("{:.*e}", precision, abs);
    let (mantissa, exponent) = split_exp(&rendered);
    let mut s = String::with_capacity(rendered.len() + 2);
    s.push_str(mantissa);
    if alternate && precision == 0 {
        s.push('.');
    }
    let sign = if exponent < 0 { '-' } else { '+' };
    let _ = write!(s, "e{}{:02}", sign, exponent.unsigned_abs());
    s
}

fn split_exp(rendered: &str) -> (&str, i32) {
    match rendered.split_once('e') {
        Some((mantissa, exp)) => (mantissa, exp.parse().unwrap_or(0)),
        None => (rendered, 0),
    }
}

/// Removes trailing fractional zeros (and a bare point) before any exponent.
fn strip_fraction_zeros(s: &mut String) {
    let exp_at = s.find('e').unwrap_or(s.len());
    let (number, exponent) = s.split_at(exp_at);
    if !number.contains('.') {
        return;
    }
    let trimmed = number.trim_end_matches('0').trim_end_matches('.');
    *s = format!("{}{}", trimmed, exponent);
}

/// C-style `%a` body without the `0x` prefix: `h.hhhp[+-]d`.
fn hex_float(abs: f64, alternate: bool) -> String {
    if abs == 0.0 {
        return if alternate { "0.p+0".into() } else { "0p+0".into() };
    }
    let bits = abs.to_bits();
    let biased = ((bits >> 52) & 0x7ff) as i32;
    let mantissa = bits & ((1u64 << 52) - 1);
    let (lead, exponent) = if biased == 0 {
        (0, -1022)
    } else {
        (1, biased - 1023)
    };
    let fraction = format!("{:013x}", mantissa);
    let fraction = fraction.trim_end_matches('0');

    let mut s = lead.to_string();
    if !fraction.is_empty() || alternate {
        s.push('.');
        s.push_str(fraction);
    }
    let sign = if exponent < 0 { '-' } else { '+' };
    let _ = write!(s, "p{}{}", sign, exponent.unsigned_abs());
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args_of(template: &str, args: &[Arg<'_>]) -> Vec<String> {
        split_template(template, args)
            .unwrap()
            .into_iter()
            .map(|a| String::from_utf8(a).unwrap())
            .collect()
    }

    fn one(template: &str, arg: impl Into<Arg<'static>>) -> String {
        let mut argv = args_of(template, &[arg.into()]);
        assert_eq!(argv.len(), 1);
        argv.remove(0)
    }

    #[test]
    fn encodes_set_command() {
        let encoded = format_command("SET %s %s", &["k".into(), "v".into()]).unwrap();
        assert_eq!(encoded, b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$1\r\nv\r\n");
    }

    #[test]
    fn splits_on_unquoted_spaces() {
        assert_eq!(args_of("  GET   key  ", &[]), vec!["GET", "key"]);
        assert_eq!(
            args_of("SET k 'hello world'", &[]),
            vec!["SET", "k", "hello world"]
        );
        // Placeholders inside a quoted span are literal.
        assert_eq!(args_of("ECHO '%s x'", &[]), vec!["ECHO", "%s x"]);
    }

    #[test]
    fn binary_placeholder_keeps_bytes_in_one_argument() {
        let payload: &[u8] = b"a b\r\n\0c";
        let argv = split_template("SET key %b", &[payload.into()]).unwrap();
        assert_eq!(argv[2], payload);
    }

    #[test]
    fn empty_placeholder_still_creates_argument() {
        let argv = split_template("SET key %b", &[Arg::Bytes(b"")]).unwrap();
        assert_eq!(argv.len(), 3);
        assert!(argv[2].is_empty());
    }

    #[test]
    fn placeholders_join_surrounding_text() {
        assert_eq!(args_of("key:%s:%d", &["user".into(), 7.into()]), vec!["key:user:7"]);
        assert_eq!(args_of("INCRBY n 100%%", &[]), vec!["INCRBY", "n", "100%"]);
        assert_eq!(args_of("ECHO 50%", &[]), vec!["ECHO", "50%"]);
    }

    #[test]
    fn integer_conversions() {
        assert_eq!(one("%d", 42), "42");
        assert_eq!(one("%5d", 42), "   42");
        assert_eq!(one("%-5d|", 42), "42   |");
        assert_eq!(one("%05d", -42), "-0042");
        assert_eq!(one("%+d", 3), "+3");
        assert_eq!(one("%.3d", 7), "007");
        assert_eq!(one("%x", 255), "ff");
        assert_eq!(one("%#X", 255), "0XFF");
        assert_eq!(one("%#o", 8), "010");
        assert_eq!(one("%u", 5_000_000_000u64), "5000000000");
        assert_eq!(one("%ld", i64::MIN), "-9223372036854775808");
        assert_eq!(one("%hhd", 300), "44");
        assert_eq!(one("%hu", -1), "65535");
        assert_eq!(one("%lld", 12), "12");
    }

    #[test]
    fn float_conversions() {
        assert_eq!(one("%f", 1.5), "1.500000");
        assert_eq!(one("%.2f", 3.14159), "3.14");
        assert_eq!(one("%8.3f", -2.5), "  -2.500");
        assert_eq!(one("%e", 12345.678), "1.234568e+04");
        assert_eq!(one("%.1E", 0.00012), "1.2E-04");
        assert_eq!(one("%g", 0.0001), "0.0001");
        assert_eq!(one("%g", 100000.0), "100000");
        assert_eq!(one("%g", 1000000.0), "1e+06");
        assert_eq!(one("%G", 0.00001), "1E-05");
        assert_eq!(one("%g", 2.5), "2.5");
        assert_eq!(one("%a", 1.0), "0x1p+0");
        assert_eq!(one("%a", 10.0), "0x1.4p+3");
        assert_eq!(one("%A", -0.5), "-0X1P-1");
        assert_eq!(one("%f", f64::INFINITY), "inf");
    }

    #[test]
    fn malformed_templates_are_rejected() {
        fn rejected(template: &str, args: &[Arg<'_>]) {
            let err = format_command(template, args).unwrap_err();
            assert!(matches!(err, Error::Format(_)), "{template:?}: {err}");
        }
        rejected("GET %q", &[Arg::Int(1)]);
        rejected("GET %hf", &[Arg::Float(1.0)]);
        rejected("GET %lz", &[Arg::Int(1)]);
        rejected("GET %.2a", &[Arg::Float(1.0)]);
        rejected("GET %s", &[]);
        rejected("GET %d", &[Arg::Str("x")]);
        rejected("GET %s", &[Arg::Int(3)]);
        rejected("GET", &[Arg::Int(3)]);
        rejected("", &[]);
        rejected("   ", &[]);
    }

    #[test]
    fn writer_tracks_depth_and_keeps_queue_on_error() {
        let mut writer = CommandWriter::new();
        writer.append("PING", &[]).unwrap();
        writer.append_argv(&["SET", "k", "v"]).unwrap();
        assert_eq!(writer.depth(), 2);
        let queued = writer.pending().to_vec();

        assert!(writer.append("SET %d", &[Arg::Str("oops")]).is_err());
        assert!(writer.append_argv::<&str>(&[]).is_err());
        assert_eq!(writer.depth(), 2);
        assert_eq!(writer.pending(), &queued[..]);
        assert_eq!(
            &queued[..],
            &b"*1\r\n$4\r\nPING\r\n*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$1\r\nv\r\n"[..]
        );

        writer.clear();
        assert!(writer.is_empty());
        assert_eq!(writer.depth(), 0);
    }

    #[test]
    fn encoded_len_matches_output() {
        let argv = vec![b"SET".to_vec(), vec![b'x'; 1234], Vec::new()];
        let mut out = Vec::new();
        encode_into(&argv, |chunk| {
            out.extend_from_slice(chunk);
            Ok(())
        })
        .unwrap();
        assert_eq!(out.len(), encoded_len(&argv));
    }
}
