//! Fitting a single oversized fragment into a byte budget

use super::parser::DiffFragment;

/// Literal line inserted where body lines were dropped
pub fn omission_marker(lines: usize) -> String {
    format!("... [{} lines omitted] ...\n", lines)
}

/// Notice emitted when not even the header fits
pub fn truncation_notice(bytes: usize) -> String {
    format!("[truncated: {} bytes omitted]\n", bytes)
}

/// Longest prefix of `text` that is at most `max` bytes and ends on a char boundary
pub fn clamp_to_char_boundary(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

/// Shrink a fragment to at most `budget` bytes
///
/// Header lines are kept verbatim along with the first and last `k` body
/// lines, where `k` starts from the budget divided by the average body line
/// length and shrinks until the result fits. If the header alone does not
/// fit, only the `diff --git` line and a truncation notice remain, clamped to
/// the budget.
pub fn truncate_fragment(fragment: &DiffFragment<'_>, budget: usize) -> String {
    if fragment.text.len() <= budget {
        return fragment.text.to_string();
    }

    let lines: Vec<&str> = fragment.body.split_inclusive('\n').collect();
    let total = lines.len();

    if total > 0 && fragment.header.len() < budget {
        let avg_line = (fragment.body.len() / total).max(1);
        let room = budget - fragment.header.len();
        let max_k = total.saturating_sub(1) / 2;
        let mut k = (room / avg_line / 2).min(max_k);

        loop {
            let omitted = total - 2 * k;
            let candidate = assemble(fragment.header, &lines[..k], omitted, &lines[total - k..]);
            if candidate.len() <= budget {
                return candidate;
            }
            if k == 0 {
                break;
            }
            k -= 1;
        }
    }

    header_only(fragment, budget)
}

fn assemble(header: &str, head: &[&str], omitted: usize, tail: &[&str]) -> String {
    let marker = omission_marker(omitted);
    let body_len: usize = head.iter().chain(tail).map(|l| l.len()).sum();
    let mut out = String::with_capacity(header.len() + body_len + marker.len() + 1);
    out.push_str(header);
    for line in head {
        out.push_str(line);
    }
    if !out.is_empty() && !out.ends_with('\n') {
        out.push('\n');
    }
    out.push_str(&marker);
    for line in tail {
        out.push_str(line);
    }
    out
}

fn header_only(fragment: &DiffFragment<'_>, budget: usize) -> String {
    let first = fragment.first_line();
    let mut out = String::from(first);
    if !out.ends_with('\n') {
        out.push('\n');
    }
    out.push_str(&truncation_notice(fragment.text.len() - first.len()));
    clamp_to_char_boundary(&out, budget).to_string()
}
