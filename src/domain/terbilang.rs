//! Indonesian number words, as printed on a kwitansi.

const UNITS: [&str; 12] = [
    "", "satu", "dua", "tiga", "empat", "lima", "enam", "tujuh", "delapan", "sembilan",
    "sepuluh", "sebelas",
];

const SCALES: [(u64, &str); 4] = [
    (1_000_000_000_000, "triliun"),
    (1_000_000_000, "miliar"),
    (1_000_000, "juta"),
    (1_000, "ribu"),
];

fn below_thousand(n: u64) -> String {
    match n {
        0..=11 => UNITS[n as usize].to_string(),
        12..=19 => format!("{} belas", UNITS[(n - 10) as usize]),
        20..=99 => join(format!("{} puluh", UNITS[(n / 10) as usize]), below_thousand(n % 10)),
        100..=199 => join("seratus".to_string(), below_thousand(n - 100)),
        _ => join(
            format!("{} ratus", UNITS[(n / 100) as usize]),
            below_thousand(n % 100),
        ),
    }
}

fn join(head: String, tail: String) -> String {
    if tail.is_empty() {
        head
    } else {
        format!("{head} {tail}")
    }
}

/// Spells out a whole number: `1500` becomes "seribu lima ratus".
pub fn to_words(n: u64) -> String {
    if n == 0 {
        return "nol".to_string();
    }
    let mut rest = n;
    let mut parts = Vec::new();
    for (scale, name) in SCALES {
        let count = rest / scale;
        if count == 0 {
            continue;
        }
        rest %= scale;
        if scale == 1_000 && count == 1 {
            parts.push("seribu".to_string());
        } else {
            // counts of a trillion and above are spelled recursively
            parts.push(format!("{} {name}", to_words(count)));
        }
    }
    if rest > 0 {
        parts.push(below_thousand(rest));
    }
    parts.join(" ")
}

/// Rupiah amount in words; fractions are rounded to whole rupiah.
pub fn rupiah(amount: f64) -> String {
    let whole = amount.max(0.0).round() as u64;
    format!("{} rupiah", to_words(whole))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_numbers() {
        assert_eq!(to_words(0), "nol");
        assert_eq!(to_words(1), "satu");
        assert_eq!(to_words(11), "sebelas");
        assert_eq!(to_words(15), "lima belas");
        assert_eq!(to_words(20), "dua puluh");
        assert_eq!(to_words(99), "sembilan puluh sembilan");
        assert_eq!(to_words(100), "seratus");
        assert_eq!(to_words(111), "seratus sebelas");
        assert_eq!(to_words(250), "dua ratus lima puluh");
    }

    #[test]
    fn thousands_and_up() {
        assert_eq!(to_words(1_000), "seribu");
        assert_eq!(to_words(1_500), "seribu lima ratus");
        assert_eq!(to_words(2_000), "dua ribu");
        assert_eq!(to_words(101_000), "seratus satu ribu");
        assert_eq!(to_words(1_000_000), "satu juta");
        assert_eq!(to_words(2_500_000), "dua juta lima ratus ribu");
        assert_eq!(to_words(1_000_000_000), "satu miliar");
        assert_eq!(to_words(3_000_000_000_000), "tiga triliun");
    }

    #[test]
    fn rupiah_suffix_and_rounding() {
        assert_eq!(rupiah(1_500_000.0), "satu juta lima ratus ribu rupiah");
        assert_eq!(rupiah(999.6), "seribu rupiah");
        assert_eq!(rupiah(0.0), "nol rupiah");
    }
}
