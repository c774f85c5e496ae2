// Author: Lukas Bower
// Purpose: Minimal printf-style substitution for decoded log format strings.

use std::fmt::Write as _;

use super::value::DecodedValue;

/// Render `format` by substituting each `%`-conversion with the
/// correspondingly-positioned entry of `args`, in order.
///
/// Supports `%d %i %u %x %X %o %s %f %c %%`, with an optional zero-padded
/// width (e.g. `%08x`). Unknown conversions and argument-count mismatches
/// are reported via `Err` so the caller can fall back per §4.8 rather than
/// panicking on a malformed symbol table.
pub fn render(format: &str, args: &[DecodedValue]) -> Result<String, String> {
    let mut out = String::with_capacity(format.len());
    let mut chars = format.chars().peekable();
    let mut arg_index = 0;

    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        match chars.peek() {
            Some('%') => {
                chars.next();
                out.push('%');
                continue;
            }
            None => {
                return Err("trailing '%' in format string".to_string());
            }
            _ => {}
        }

        let mut zero_pad = false;
        let mut width = 0usize;
        if chars.peek() == Some(&'0') {
            zero_pad = true;
            chars.next();
        }
        while let Some(d) = chars.peek().and_then(|c| c.to_digit(10)) {
            width = width * 10 + d as usize;
            chars.next();
        }

        let conv = chars
            .next()
            .ok_or_else(|| "truncated conversion in format string".to_string())?;

        let arg = args
            .get(arg_index)
            .ok_or_else(|| format!("format string expects more arguments than decoded ({arg_index})"))?;
        arg_index += 1;

        let rendered = render_one(conv, arg)?;
        if width > rendered.len() {
            let pad = width - rendered.len();
            if zero_pad && rendered.starts_with('-') {
                out.push('-');
                out.extend(std::iter::repeat('0').take(pad));
                out.push_str(&rendered[1..]);
            } else if zero_pad {
                out.extend(std::iter::repeat('0').take(pad));
                out.push_str(&rendered);
            } else {
                out.extend(std::iter::repeat(' ').take(pad));
                out.push_str(&rendered);
            }
        } else {
            out.push_str(&rendered);
        }
    }

    Ok(out)
}

fn render_one(conv: char, arg: &DecodedValue) -> Result<String, String> {
    let mut out = String::new();
    match conv {
        'd' | 'i' => write!(out, "{}", arg.as_signed()?).unwrap(),
        'u' => write!(out, "{}", arg.as_unsigned()?).unwrap(),
        'x' => write!(out, "{:x}", arg.as_unsigned()?).unwrap(),
        'X' => write!(out, "{:X}", arg.as_unsigned()?).unwrap(),
        'o' => write!(out, "{:o}", arg.as_unsigned()?).unwrap(),
        'f' => write!(out, "{}", arg.as_double()?).unwrap(),
        'c' => {
            let v = arg.as_unsigned()?;
            let ch = char::from_u32(v as u32).unwrap_or('\u{FFFD}');
            out.push(ch);
        }
        's' => out.push_str(&arg.as_display()),
        other => return Err(format!("unsupported conversion '%{other}'")),
    }
    Ok(out)
}
