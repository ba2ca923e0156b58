//! Statement splitting for init scripts.
//!
//! Statements end at `;` outside string literals. `--` and `//` line
//! comments and `/* */` block comments are dropped, runs of whitespace
//! outside literals collapse to one space, and empty statements vanish.

/// Split a script into trimmed, non-empty statements.
#[must_use]
pub fn split_statements(script: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut pending_space = false;
    let mut chars = script.chars().peekable();

    while let Some(c) = chars.next() {
        if let Some(q) = quote {
            current.push(c);
            if c == '\\' {
                if let Some(escaped) = chars.next() {
                    current.push(escaped);
                }
            } else if c == q {
                quote = None;
            }
            continue;
        }

        match c {
            '-' if chars.peek() == Some(&'-') => {
                skip_line(&mut chars);
                pending_space = true;
            }
            '/' if chars.peek() == Some(&'/') => {
                skip_line(&mut chars);
                pending_space = true;
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                skip_block(&mut chars);
                pending_space = true;
            }
            ';' => {
                finish(&mut statements, &mut current);
                pending_space = false;
            }
            c if c.is_whitespace() => pending_space = true,
            c => {
                if pending_space && !current.is_empty() {
                    current.push(' ');
                }
                pending_space = false;
                if matches!(c, '\'' | '"' | '`') {
                    quote = Some(c);
                }
                current.push(c);
            }
        }
    }
    finish(&mut statements, &mut current);
    statements
}

fn finish(statements: &mut Vec<String>, current: &mut String) {
    let statement = current.trim();
    if !statement.is_empty() {
        statements.push(statement.to_string());
    }
    current.clear();
}

fn skip_line(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) {
    for c in chars.by_ref() {
        if c == '\n' {
            break;
        }
    }
}

fn skip_block(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) {
    while let Some(c) = chars.next() {
        if c == '*' && chars.peek() == Some(&'/') {
            chars.next();
            return;
        }
    }
}
