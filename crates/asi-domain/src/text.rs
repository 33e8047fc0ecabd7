/// Deterministic text for embedding a concept: `"{name}: {description}"`,
/// cleaned and capped at `max_chars` while always keeping the name intact.
pub fn prepare_text_for_embedding(
	concept_name: &str,
	description: &str,
	max_chars: usize,
) -> String {
	let name = clean_text(concept_name);

	if name.is_empty() {
		return String::new();
	}

	let description = clean_text(description);
	let combined = if description.is_empty() {
		name.clone()
	} else {
		format!("{name}: {description}")
	};

	if combined.chars().count() <= max_chars {
		return combined;
	}

	let name_len = name.chars().count();

	if !description.is_empty() && name_len + 2 < max_chars {
		let budget = max_chars.saturating_sub(name_len + 2 + 1);
		let truncated: String = description.chars().take(budget).collect();

		return format!("{name}: {truncated}…");
	}

	let mut truncated: String = combined.chars().take(max_chars.saturating_sub(1)).collect();

	truncated.push('…');

	truncated
}

/// Collapse whitespace, strip control and zero-width characters, and
/// normalize curly quotes. CJK text passes through untouched.
fn clean_text(text: &str) -> String {
	let mut cleaned = String::with_capacity(text.len());

	for ch in text.chars() {
		match ch {
			'\u{200b}' | '\u{200c}' | '\u{200d}' | '\u{feff}' => {},
			'\u{201c}' | '\u{201d}' => cleaned.push('"'),
			'\u{2018}' | '\u{2019}' => cleaned.push('\''),
			ch if ch.is_control() => cleaned.push(' '),
			ch => cleaned.push(ch),
		}
	}

	cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}
