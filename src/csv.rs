use dash_types::{Record, Scalar};
use futures::StreamExt;

/// Reads a headed UTF-8 CSV export into records, one per data row.
pub async fn read_records<P: AsRef<std::path::Path>>(path: P) -> Result<Vec<Record>, anyhow::Error> {
    let data = tokio::fs::read_to_string(path.as_ref()).await?;
    parse_records(&data).await
}

pub async fn parse_records(data: &str) -> Result<Vec<Record>, anyhow::Error> {
    let mut rdr = csv_async::AsyncReaderBuilder::new()
        .delimiter(b',')
        .trim(csv_async::Trim::Headers)
        .create_reader(data.trim_start_matches('\u{feff}').as_bytes());
    let headers = rdr.headers().await?.clone();
    let mut rows = rdr.records();
    let mut records = vec![];
    while let Some(row) = rows.next().await.transpose()? {
        records.push(
            headers
                .iter()
                .zip(row.iter())
                .filter(|(h, _)| !h.is_empty())
                .map(|(h, v)| (h, parse_cell(v)))
                .collect(),
        );
    }
    Ok(records)
}

/// Typed value of one cell. Identifiers with leading zeros stay text.
pub fn parse_cell(raw: &str) -> Scalar {
    let cell = raw.trim();
    if cell.is_empty() {
        return Scalar::Null;
    }
    match cell.to_lowercase().as_str() {
        "true" => return Scalar::Bool(true),
        "false" => return Scalar::Bool(false),
        _ => (),
    }
    let digits = cell.trim_start_matches('-');
    let leading_zero = digits.len() > 1 && digits.starts_with('0') && !digits.starts_with("0.");
    if leading_zero {
        return Scalar::Text(raw.to_string());
    }
    if let Ok(n) = cell.parse::<i64>() {
        return Scalar::from(n);
    }
    match cell.parse::<f64>() {
        Ok(n) if n.is_finite() && cell.bytes().any(|b| b.is_ascii_digit()) => Scalar::from(n),
        _ => Scalar::Text(raw.to_string()),
    }
}
