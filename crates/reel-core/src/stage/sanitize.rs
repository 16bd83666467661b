//! Sanitizado de mensajes de error de stages antes de persistirlos.
//!
//! Los mensajes acaban en eventos y en el estado del job, que son visibles
//! para cualquier cliente: se enmascaran credenciales y se acota la longitud.

use crate::constants::MAX_STAGE_MESSAGE_CHARS;

const REDACTED: &str = "[redacted]";

const SECRET_KEYS: &[&str] = &["api_key", "apikey", "api-key", "token", "secret", "password", "passwd", "pwd", "authorization", "access_key"];

const SECRET_PREFIXES: &[&str] = &["sk-", "ghp_", "gho_", "xoxb-", "xoxp-", "AKIA"];

fn is_secret_key(key: &str) -> bool {
    let key = key.trim_matches(|c: char| !c.is_alphanumeric() && c != '_' && c != '-').to_ascii_lowercase();
    SECRET_KEYS.iter().any(|k| key.ends_with(k))
}

fn redact_word(word: &str, redact_next: &mut bool) -> String {
    if let Some(pos) = word.find(&['=', ':'][..]) {
        if is_secret_key(&word[..pos]) {
            if word[pos + 1..].is_empty() {
                *redact_next = true;
                return word.to_string();
            }
            return format!("{}{}", &word[..=pos], REDACTED);
        }
    }
    if let Some(scheme_end) = word.find("://") {
        let rest = &word[scheme_end + 3..];
        let authority_end = rest.find('/').unwrap_or(rest.len());
        if let Some(at) = rest[..authority_end].rfind('@') {
            return format!("{}://{}@{}", &word[..scheme_end], REDACTED, &rest[at + 1..]);
        }
    }
    let bare = word.trim_matches(|c: char| c == '"' || c == '\'' || c == ',' || c == ';');
    if SECRET_PREFIXES.iter().any(|p| bare.starts_with(p) && bare.len() > p.len() + 8) {
        return REDACTED.to_string();
    }
    word.to_string()
}

/// Enmascara credenciales conocidas y trunca a un máximo de caracteres.
pub fn sanitize_message(raw: &str) -> String {
    let mut out = Vec::new();
    let mut redact_next = false;
    let mut after_key = false;
    for word in raw.split_whitespace() {
        if word.eq_ignore_ascii_case("bearer") || word.eq_ignore_ascii_case("basic") {
            out.push(if redact_next { REDACTED.to_string() } else { word.to_string() });
            redact_next = true;
            continue;
        }
        if redact_next {
            out.push(REDACTED.to_string());
            redact_next = false;
            continue;
        }
        // `password = x`, `token :x`: el separador llega suelto tras la clave.
        if std::mem::take(&mut after_key) {
            if let Some(sep) = word.chars().next().filter(|c| *c == '=' || *c == ':') {
                if word.len() == 1 {
                    out.push(word.to_string());
                    redact_next = true;
                } else {
                    out.push(format!("{sep}{REDACTED}"));
                }
                continue;
            }
        }
        if !word.contains(&['=', ':'][..]) && is_secret_key(word) {
            after_key = true;
            out.push(word.to_string());
            continue;
        }
        out.push(redact_word(word, &mut redact_next));
    }
    let joined = out.join(" ");
    if joined.chars().count() <= MAX_STAGE_MESSAGE_CHARS {
        return joined;
    }
    let mut cut: String = joined.chars().take(MAX_STAGE_MESSAGE_CHARS).collect();
    cut.push_str("...");
    cut
}
