use std::path::Path;

use clap::Args;

use super::common::{expect_repository, history_path};
use crate::{
    history::{History, RunRecord, RunStatus},
    publisher::DEFAULT_REPOSITORY,
    Result,
};

/// Name of the column that is colored by the outcome of the run.
const STATUS_COLUMN: &str = "status";

#[derive(Debug, Args)]
pub struct HistoryArgs {
    /// The repository whose runs to show.
    #[arg(long = "repository", default_value = DEFAULT_REPOSITORY, value_parser = expect_repository)]
    pub repository: String,
}

pub fn history(state_dir: &Path, args: HistoryArgs) -> Result<()> {
    let history = History::new(history_path(state_dir, &args.repository));
    let mut records = history.load()?;

    if records.is_empty() {
        println!("No runs recorded for {}.", args.repository);
        return Ok(());
    }

    // Most recent first.
    records.reverse();

    println!("{table}", table = table(&records)?);

    Ok(())
}

fn table(records: &[RunRecord]) -> Result<comfy_table::Table> {
    use comfy_table::{Attribute, Cell, Color, ContentArrangement, Table};
    use time_local::OffsetDateTimeExt;

    // Every closure has its own type while the elements of an array must share one. Passing each closure through
    // `accessor` coerces it to a function pointer. See https://github.com/rust-lang/rust/issues/85077.
    type Accessor = fn(&RunRecord) -> Result<Option<String>>;

    fn accessor(f: Accessor) -> Accessor {
        f
    }

    fn format_date(value: time::OffsetDateTime) -> Result<String> {
        let fd = time::macros::format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
        Ok(value.to_local().unwrap_or(value).format(fd)?)
    }

    fn format_duration(secs: u64) -> String {
        format!("{}m{:02}s", secs / 60, secs % 60)
    }

    let columns = [
        (
            "started",
            accessor(|record| Ok(Some(format_date(record.started)?))),
        ),
        (
            "duration",
            accessor(|record| Ok(Some(format_duration(record.duration_secs)))),
        ),
        (
            STATUS_COLUMN,
            accessor(|record| Ok(Some(record.status.to_string()))),
        ),
        (
            "pushed tags",
            accessor(|record| Ok(Some(record.pushed.join("\n")))),
        ),
        ("commit", accessor(|record| Ok(record.commit.clone()))),
        ("user", accessor(|record| Ok(Some(record.user.clone())))),
        (
            "image",
            accessor(|record| {
                Ok(record.artifacts.as_ref().map(|artifacts| {
                    artifacts
                        .digest
                        .clone()
                        .unwrap_or_else(|| artifacts.image_id.clone())
                }))
            }),
        ),
    ];

    let status_index = columns
        .iter()
        .position(|(name, _)| *name == STATUS_COLUMN);
    let (column_names, accessors): (Vec<_>, Vec<_>) = columns.into_iter().unzip();

    let mut table = Table::new();
    table
        .load_preset(comfy_table::presets::UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(
            column_names
                .into_iter()
                .map(|name| Cell::new(name).add_attribute(Attribute::Bold)),
        );

    for record in records {
        let color = match record.status {
            RunStatus::Succeeded => Color::Green,
            RunStatus::Failed { .. } | RunStatus::TimedOut => Color::Red,
        };
        let values = accessors
            .iter()
            .map(|f| f(record))
            .collect::<Result<Vec<_>, _>>()?;
        table.add_row(values.into_iter().enumerate().map(|(index, value)| {
            let cell = Cell::new(value.unwrap_or_default());
            if Some(index) == status_index {
                cell.fg(color)
            } else {
                cell
            }
        }));
    }

    Ok(table)
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;
    use crate::history::FailureKind;

    fn record(status: RunStatus) -> RunRecord {
        RunRecord {
            started: datetime!(2024-03-05 09:07 UTC),
            duration_secs: 125,
            status,
            timestamp_tag: Some("2024-03-05T0907".to_owned()),
            pushed: vec!["1.0".to_owned()],
            commit: Some("abc123".to_owned()),
            publisher_version: "0.1.0".to_owned(),
            user: "jenkins".to_owned(),
            artifacts: None,
        }
    }

    #[test]
    fn only_the_status_cell_is_colored() {
        let records = [
            record(RunStatus::Succeeded),
            record(RunStatus::Failed {
                kind: FailureKind::Push,
            }),
        ];
        let mut table = table(&records).unwrap();
        table.enforce_styling();
        let rendered = table.to_string();

        for status in ["succeeded", "failed (push)"] {
            let line = rendered
                .lines()
                .find(|line| line.contains(status))
                .unwrap_or_else(|| panic!("no row for {status:?} in\n{rendered}"));
            assert!(line.contains("2m05s"), "{line}");
            for cell in line.split('\u{2502}') {
                let styled = cell.contains('\x1b');
                assert_eq!(styled, cell.contains(status), "{cell:?}");
            }
        }
    }
}
