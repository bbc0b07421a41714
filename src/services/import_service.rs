use std::{collections::HashSet, fmt, path::Path};

use anyhow::Context;
use clap::ValueEnum;
use sea_orm::{
    ActiveValue::Set, DatabaseConnection, EntityTrait, QuerySelect, TransactionTrait,
};
use uuid::Uuid;

use crate::entity::{Ingredients, ingredients};

/// Rows per `INSERT` statement; keeps bind parameters well under the Postgres limit.
pub const INSERT_CHUNK: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ImportFormat {
    Json,
    Csv,
}

impl ImportFormat {
    /// Guesses the format from the file extension, ignoring case.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?;
        <Self as ValueEnum>::from_str(ext, true).ok()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngredientRow {
    pub name: String,
    pub measurement_unit: String,
}

impl IngredientRow {
    fn key(&self) -> (String, String) {
        (
            self.name.to_lowercase(),
            self.measurement_unit.to_lowercase(),
        )
    }
}

/// A source row that could not be turned into an ingredient. `position` is 1-based.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidRow {
    pub position: usize,
    pub raw: String,
    pub reason: &'static str,
}

#[derive(Debug, Default)]
pub struct ParsedRows {
    pub valid: Vec<IngredientRow>,
    pub invalid: Vec<InvalidRow>,
}

impl ParsedRows {
    fn push(&mut self, position: usize, raw: String, name: Option<&str>, unit: Option<&str>) {
        let name = name.map(str::trim).filter(|v| !v.is_empty());
        let unit = unit.map(str::trim).filter(|v| !v.is_empty());
        match (name, unit) {
            (Some(name), Some(unit)) => self.valid.push(IngredientRow {
                name: name.to_string(),
                measurement_unit: unit.to_string(),
            }),
            _ => self.invalid.push(InvalidRow {
                position,
                raw,
                reason: "missing name or measurement_unit",
            }),
        }
    }
}

pub fn parse_json(content: &str) -> anyhow::Result<ParsedRows> {
    let items: Vec<serde_json::Value> = serde_json::from_str(content)
        .context("expected a JSON array of {name, measurement_unit} objects")?;

    let mut parsed = ParsedRows::default();
    for (idx, item) in items.iter().enumerate() {
        parsed.push(
            idx + 1,
            item.to_string(),
            item.get("name").and_then(serde_json::Value::as_str),
            item.get("measurement_unit")
                .and_then(serde_json::Value::as_str),
        );
    }
    Ok(parsed)
}

/// Two columns per record: `name,measurement_unit`. Blank lines are ignored.
/// A quoted field may span lines; the record's position is the line it
/// starts on.
pub fn parse_csv(content: &str) -> ParsedRows {
    let mut parsed = ParsedRows::default();
    for record in csv_records(content) {
        if record.raw.trim().is_empty() {
            continue;
        }
        if record.fields.len() < 2 {
            parsed.invalid.push(InvalidRow {
                position: record.line,
                raw: record.raw,
                reason: "expected two columns",
            });
            continue;
        }
        parsed.push(
            record.line,
            record.raw.clone(),
            Some(record.fields[0].as_str()),
            Some(record.fields[1].as_str()),
        );
    }
    parsed
}

#[derive(Debug)]
struct CsvRecord {
    line: usize,
    raw: String,
    fields: Vec<String>,
}

/// Splits CSV text into records, honouring double-quoted fields, `""`
/// escapes and line breaks inside quotes. `\r\n` endings are accepted.
fn csv_records(content: &str) -> Vec<CsvRecord> {
    let mut records = Vec::new();
    let mut current = CsvRecord {
        line: 1,
        raw: String::new(),
        fields: Vec::new(),
    };
    let mut field = String::new();
    let mut quoted = false;
    let mut line = 1;
    let mut chars = content.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if quoted && chars.peek() == Some(&'"') => {
                field.push('"');
                current.raw.push_str("\"\"");
                chars.next();
                continue;
            }
            '"' => quoted = !quoted,
            ',' if !quoted => current.fields.push(std::mem::take(&mut field)),
            '\r' if !quoted && chars.peek() == Some(&'\n') => continue,
            '\n' if !quoted => {
                current.fields.push(std::mem::take(&mut field));
                line += 1;
                let next = CsvRecord {
                    line,
                    raw: String::new(),
                    fields: Vec::new(),
                };
                records.push(std::mem::replace(&mut current, next));
                continue;
            }
            '\n' => {
                line += 1;
                field.push(c);
            }
            _ => field.push(c),
        }
        current.raw.push(c);
    }
    if !current.raw.is_empty() {
        current.fields.push(field);
        records.push(current);
    }
    records
}

pub async fn read_file(path: &Path, format: ImportFormat) -> anyhow::Result<ParsedRows> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("cannot read {}", path.display()))?;

    match format {
        ImportFormat::Json => {
            parse_json(&content).with_context(|| format!("cannot decode {}", path.display()))
        }
        ImportFormat::Csv => Ok(parse_csv(&content)),
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct ImportPlan {
    pub to_insert: Vec<IngredientRow>,
    pub skipped: usize,
}

/// Drops rows already in the catalog or repeated earlier in the same file,
/// comparing name and unit case-insensitively.
pub fn plan_import(mut known: HashSet<(String, String)>, rows: Vec<IngredientRow>) -> ImportPlan {
    let mut plan = ImportPlan::default();
    for row in rows {
        if known.insert(row.key()) {
            plan.to_insert.push(row);
        } else {
            plan.skipped += 1;
        }
    }
    plan
}

#[derive(Debug, Default)]
pub struct ImportReport {
    pub loaded: usize,
    pub skipped: usize,
    pub invalid: Vec<InvalidRow>,
}

impl fmt::Display for ImportReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "loaded {}, skipped {} (already present), invalid {}",
            self.loaded,
            self.skipped,
            self.invalid.len()
        )
    }
}

pub async fn import_ingredients(
    db: &DatabaseConnection,
    parsed: ParsedRows,
) -> anyhow::Result<ImportReport> {
    let existing: Vec<(String, String)> = Ingredients::find()
        .select_only()
        .column(ingredients::Column::Name)
        .column(ingredients::Column::MeasurementUnit)
        .into_tuple()
        .all(db)
        .await
        .context("loading existing ingredients")?;

    let known = existing
        .into_iter()
        .map(|(name, unit)| (name.to_lowercase(), unit.to_lowercase()))
        .collect();
    let plan = plan_import(known, parsed.valid);

    let txn = db.begin().await.context("starting import transaction")?;
    for (idx, chunk) in plan.to_insert.chunks(INSERT_CHUNK).enumerate() {
        let models = chunk.iter().map(|row| ingredients::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(row.name.clone()),
            measurement_unit: Set(row.measurement_unit.clone()),
        });
        Ingredients::insert_many(models)
            .exec(&txn)
            .await
            .with_context(|| {
                format!(
                    "inserting rows {}..{}",
                    idx * INSERT_CHUNK + 1,
                    idx * INSERT_CHUNK + chunk.len()
                )
            })?;
    }
    txn.commit().await.context("committing import")?;

    tracing::info!(
        loaded = plan.to_insert.len(),
        skipped = plan.skipped,
        invalid = parsed.invalid.len(),
        "ingredient import finished"
    );

    Ok(ImportReport {
        loaded: plan.to_insert.len(),
        skipped: plan.skipped,
        invalid: parsed.invalid,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(name: &str, unit: &str) -> IngredientRow {
        IngredientRow {
            name: name.into(),
            measurement_unit: unit.into(),
        }
    }

    #[test]
    fn format_from_flag_or_extension() {
        assert_eq!(
            <ImportFormat as ValueEnum>::from_str("CSV", true),
            Ok(ImportFormat::Csv)
        );
        assert!(<ImportFormat as ValueEnum>::from_str("xml", true).is_err());
        assert_eq!(
            ImportFormat::from_path(Path::new("data/ingredients.CSV")),
            Some(ImportFormat::Csv)
        );
        assert_eq!(
            ImportFormat::from_path(Path::new("data/ingredients.json")),
            Some(ImportFormat::Json)
        );
        assert_eq!(ImportFormat::from_path(Path::new("data/ingredients")), None);
    }

    #[test]
    fn json_rows_missing_values_are_invalid() {
        let parsed = parse_json(
            r#"[
                {"name": "salt", "measurement_unit": "g"},
                {"name": "  ", "measurement_unit": "g"},
                {"measurement_unit": "ml"}
            ]"#,
        )
        .unwrap();

        assert_eq!(parsed.valid, vec![row("salt", "g")]);
        assert_eq!(
            parsed.invalid.iter().map(|r| r.position).collect::<Vec<_>>(),
            vec![2, 3]
        );
    }

    #[test]
    fn json_object_instead_of_array_fails() {
        assert!(parse_json(r#"{"name": "salt"}"#).is_err());
        assert!(parse_json("not json").is_err());
    }

    #[test]
    fn csv_rows_are_trimmed_and_quoted_commas_kept() {
        let parsed = parse_csv("абрикосовое варенье, г\n\n\"sauce, hot\",ml\nlonely\n,шт\n");

        assert_eq!(
            parsed.valid,
            vec![row("абрикосовое варенье", "г"), row("sauce, hot", "ml")]
        );
        assert_eq!(parsed.invalid.len(), 2);
        assert_eq!(parsed.invalid[0].position, 4);
        assert_eq!(parsed.invalid[0].raw, "lonely");
        assert_eq!(parsed.invalid[1].position, 5);
    }

    #[test]
    fn csv_quoted_line_breaks_stay_in_one_record() {
        let parsed = parse_csv("\"соус\nтерияки\",мл\r\nsalt,g\n\"say \"\"cheese\"\"\",г\nbroken\n");

        assert_eq!(
            parsed.valid,
            vec![
                row("соус\nтерияки", "мл"),
                row("salt", "g"),
                row("say \"cheese\"", "г"),
            ]
        );
        assert_eq!(parsed.invalid.len(), 1);
        assert_eq!(parsed.invalid[0].position, 5);
        assert_eq!(parsed.invalid[0].raw, "broken");
    }

    #[test]
    fn plan_skips_case_insensitive_duplicates() {
        let known = HashSet::from([("salt".to_string(), "g".to_string())]);
        let plan = plan_import(
            known,
            vec![
                row("Salt", "G"),
                row("pepper", "g"),
                row("Pepper", "g"),
                row("pepper", "pinch"),
            ],
        );

        assert_eq!(plan.to_insert, vec![row("pepper", "g"), row("pepper", "pinch")]);
        assert_eq!(plan.skipped, 2);
    }

    #[test]
    fn report_summary() {
        let report = ImportReport {
            loaded: 3,
            skipped: 1,
            invalid: vec![],
        };
        assert_eq!(
            report.to_string(),
            "loaded 3, skipped 1 (already present), invalid 0"
        );
    }
}
