//! Plain-text rendering of the aggregation view, formatted the way Brazilian
//! readers expect: `.` groups thousands, `,` separates decimals and times are
//! shown in Brasília local time.

use chrono::{DateTime, Utc};
use chrono_tz::America::Sao_Paulo;
use lib_tally::core::AggregationView;
use lib_tally::election::snapshot::PercentageTotal;
use std::fmt::Write;

/// Groups an unsigned digit string in threes with `.`.
fn group_thousands(digits: &str) -> String {
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push('.');
        }
        out.push(c);
    }
    out
}

/// Integer in pt-BR notation (`60.345.999`).
pub fn format_count(value: u64) -> String {
    group_thousands(&value.to_string())
}

/// Decimal in pt-BR notation with at most three fraction digits and no
/// trailing zeros (`48,43`, `5`, `1.234,5`).
pub fn format_number(value: f64) -> String {
    let rounded = format!("{:.3}", value.abs());
    let (int_part, frac_part) = rounded.split_once('.').unwrap_or((rounded.as_str(), ""));
    let frac = frac_part.trim_end_matches('0');

    let mut out = String::new();
    if value < 0.0 && (int_part != "0" || !frac.is_empty()) {
        out.push('-');
    }
    out.push_str(&group_thousands(int_part));
    if !frac.is_empty() {
        out.push(',');
        out.push_str(frac);
    }
    out
}

/// `dd/mm/yyyy hh:mm:ss` in Brasília local time.
pub fn format_instant(instant: DateTime<Utc>) -> String {
    instant.with_timezone(&Sao_Paulo).format("%d/%m/%Y %H:%M:%S").to_string()
}

fn format_pair(pair: &PercentageTotal) -> String {
    format!("{}% ({})", format_number(pair.percentage()), format_count(pair.count()))
}

/// The `/now.txt` body.
pub fn render_summary(aggregation: &AggregationView, now: DateTime<Utc>) -> String {
    let updated = DateTime::from_timestamp_millis(aggregation.time)
        .map(format_instant)
        .unwrap_or_default();

    let mut candidates = String::new();
    for candidate in &aggregation.candidates {
        let _ = writeln!(
            candidates,
            "{}: {}{}",
            candidate.name,
            format_pair(&candidate.votes),
            if candidate.elected { " <<ELEITO>>" } else { "" }
        );
    }

    format!(
        "{now}\n\
         \n\
         Última atualização: {updated}\n\
         Votos totais: {votes}\n\
         \n\
         {candidates}\n\
         Votos válidos: {valid}\n\
         Votos em branco: {blank}\n\
         Votos nulos: {null}\n\
         \n\
         Seções apuradas: {cleared}\n\
         Seções totalizadas: {totalized}\n",
        now = format_instant(now),
        votes = format_count(aggregation.votes),
        valid = format_pair(&aggregation.valid_votes),
        blank = format_pair(&aggregation.blank_votes),
        null = format_pair(&aggregation.null_votes),
        cleared = format_pair(&aggregation.sections_cleared),
        totalized = format_pair(&aggregation.sections_totalized),
    )
}
