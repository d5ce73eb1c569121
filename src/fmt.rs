/// Signed amount with thousands separators and no currency symbol, since a
/// batch may come from any bank: -1,234.56
pub fn amount(val: f64) -> String {
    let cents = format!("{:.2}", val.abs());
    let (int_part, dec_part) = cents.split_once('.').unwrap_or((&cents, "00"));

    let mut grouped = String::new();
    for (i, c) in int_part.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }
    let grouped: String = grouped.chars().rev().collect();

    if val < 0.0 {
        format!("-{grouped}.{dec_part}")
    } else {
        format!("{grouped}.{dec_part}")
    }
}

pub fn percent(confidence: f64) -> String {
    format!("{:.0}%", confidence * 100.0)
}
