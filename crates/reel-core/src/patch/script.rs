//! Operaciones de texto sobre scripts markdown.

use crate::errors::PatchError;

use super::TextReplacement;

/// Reemplaza todas las ocurrencias de cada `old`, en orden. Devuelve el texto
/// nuevo y cuántas ocurrencias encontró cada reemplazo.
pub fn replace_text(text: &str, replacements: &[TextReplacement]) -> Result<(String, Vec<usize>), PatchError> {
    let mut out = text.to_string();
    let mut counts = Vec::with_capacity(replacements.len());
    for r in replacements {
        if r.old.is_empty() {
            return Err(PatchError::Malformed("replacement 'old' must not be empty".into()));
        }
        let n = out.matches(r.old.as_str()).count();
        if n > 0 {
            out = out.replace(r.old.as_str(), &r.new);
        }
        counts.push(n);
    }
    Ok((out, counts))
}

/// Normaliza un título a slug: minúsculas, alfanuméricos y guiones.
pub fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    for c in title.trim().chars() {
        if c.is_alphanumeric() {
            slug.extend(c.to_lowercase());
        } else if (c.is_whitespace() || c == '-' || c == '_') && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    slug.trim_matches('-').to_string()
}

fn heading(line: &str) -> Option<(usize, &str)> {
    let trimmed = line.trim_end_matches(|c| c == '\n' || c == '\r');
    let level = trimmed.chars().take_while(|c| *c == '#').count();
    if level == 0 || level > 6 {
        return None;
    }
    let rest = &trimmed[level..];
    if !rest.is_empty() && !rest.starts_with(' ') {
        return None;
    }
    Some((level, rest.trim().trim_end_matches('#').trim()))
}

/// Sustituye el cuerpo de la sección cuyo título (o slug) coincide con
/// `section_id`, hasta el siguiente encabezado de igual o mayor nivel. El
/// encabezado se conserva. `None` si la sección no existe.
pub fn replace_section(text: &str, section_id: &str, new_text: &str) -> Option<String> {
    let wanted = slugify(section_id);
    let lines: Vec<&str> = text.split_inclusive('\n').collect();
    let mut in_fence = false;
    let mut start: Option<(usize, usize)> = None;
    let mut end = lines.len();

    for (i, line) in lines.iter().enumerate() {
        if line.trim_start().starts_with("```") {
            in_fence = !in_fence;
            continue;
        }
        if in_fence {
            continue;
        }
        let Some((level, title)) = heading(line) else { continue };
        match start {
            None if title == section_id || slugify(title) == wanted => start = Some((i, level)),
            Some((_, open_level)) if level <= open_level => {
                end = i;
                break;
            }
            _ => {}
        }
    }

    let (idx, _) = start?;
    let mut out: String = lines[..=idx].concat();
    if !out.ends_with('\n') {
        out.push('\n');
    }
    out.push_str(new_text);
    if !new_text.ends_with('\n') {
        out.push('\n');
    }
    if end < lines.len() {
        if !out.ends_with("\n\n") {
            out.push('\n');
        }
        out.push_str(&lines[end..].concat());
    }
    Some(out)
}
