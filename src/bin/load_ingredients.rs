use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use foodgram_api::{
    db::{create_orm_conn, run_migrations},
    services::import_service::{self, ImportFormat},
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Loads ingredients from a JSON or CSV file into the catalog, skipping
/// rows that are already present.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// File with `name`/`measurement_unit` pairs.
    path: PathBuf,

    /// Input format; guessed from the file extension when omitted.
    #[arg(long, value_enum)]
    format: Option<ImportFormat>,
}

impl Args {
    fn format(&self) -> anyhow::Result<ImportFormat> {
        match self.format {
            Some(format) => Ok(format),
            None => ImportFormat::from_path(&self.path).with_context(|| {
                format!(
                    "cannot tell the format of {}, pass --format json|csv",
                    self.path.display()
                )
            }),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let format = args.format()?;

    let parsed = import_service::read_file(&args.path, format).await?;

    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL is not set")?;
    let orm = create_orm_conn(&database_url).await?;
    run_migrations(&orm).await?;

    tracing::info!(path = %args.path.display(), ?format, "loading ingredients");
    let report = import_service::import_ingredients(&orm, parsed).await?;

    for row in &report.invalid {
        tracing::warn!(position = row.position, raw = %row.raw, reason = row.reason, "skipped invalid row");
    }
    println!("{report}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn arguments_are_well_formed() {
        Args::command().debug_assert();
    }

    #[test]
    fn explicit_format_wins_over_extension() {
        let args = Args::try_parse_from(["load_ingredients", "data.json", "--format", "csv"]).unwrap();
        assert_eq!(args.format().unwrap(), ImportFormat::Csv);
    }

    #[test]
    fn format_falls_back_to_extension() {
        let args = Args::try_parse_from(["load_ingredients", "data/ingredients.json"]).unwrap();
        assert_eq!(args.format().unwrap(), ImportFormat::Json);

        let args = Args::try_parse_from(["load_ingredients", "data/ingredients"]).unwrap();
        assert!(args.format().is_err());
    }

    #[test]
    fn unknown_format_and_missing_path_are_rejected() {
        assert!(Args::try_parse_from(["load_ingredients", "data.txt", "--format", "xml"]).is_err());
        assert!(Args::try_parse_from(["load_ingredients"]).is_err());
    }
}
