// Command line utility for comparing a query dataset against a reference atlas

use anyhow::{bail, Context, Error};
use atlas_rs::features::load_feature_list;
use atlas_rs::normalization::Normalization;
use atlas_rs::params::PipelineParams;
use atlas_rs::pipeline::{run, write_outputs, DatasetInput, ReferenceInput};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use log::info;
use std::path::PathBuf;

fn paths(matches: &ArgMatches, id: &str) -> Vec<PathBuf> {
    matches
        .get_many::<PathBuf>(id)
        .map(|v| v.cloned().collect())
        .unwrap_or_default()
}

fn required<'a>(matches: &'a ArgMatches, id: &str) -> Result<&'a String, Error> {
    matches
        .get_one::<String>(id)
        .with_context(|| format!("missing argument {id}"))
}

pub fn main() -> Result<(), Error> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let matches = Command::new("atlas-rs-cmd")
        .about("Correlate the groups of a query dataset with the groups of a reference atlas")
        .arg(
            Arg::new("QUERY")
                .help("Query matrix directory; repeat to merge replicates")
                .long("query")
                .required(true)
                .action(ArgAction::Append)
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("QUERY_ID")
                .help("Sample id prefixed to the barcodes of each query directory")
                .long("query-id")
                .action(ArgAction::Append),
        )
        .arg(
            Arg::new("QUERY_METADATA")
                .help("Query metadata table (CSV or TSV); repeat to concatenate")
                .long("query-metadata")
                .required(true)
                .action(ArgAction::Append)
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("QUERY_LABEL")
                .help("Query metadata column holding the group labels")
                .long("query-label")
                .required(true),
        )
        .arg(
            Arg::new("REFERENCE")
                .help("Reference matrix directory; repeat to merge replicates")
                .long("reference")
                .action(ArgAction::Append)
                .required_unless_present("REFERENCE_SUMMARY")
                .requires_all(["REFERENCE_METADATA", "REFERENCE_LABEL"])
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("REFERENCE_METADATA")
                .help("Reference metadata table (CSV or TSV)")
                .long("reference-metadata")
                .action(ArgAction::Append)
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("REFERENCE_LABEL")
                .help("Reference metadata column holding the group labels")
                .long("reference-label"),
        )
        .arg(
            Arg::new("REFERENCE_SUMMARY")
                .help("Precomputed reference group means, one row per feature")
                .long("reference-summary")
                .conflicts_with_all(["REFERENCE", "REFERENCE_METADATA", "REFERENCE_LABEL"])
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("FEATURES")
                .help("Restrict the correlations to the feature ids listed in this file")
                .long("features")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("PARAMS")
                .help("JSON file with run settings")
                .long("params")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("NORMALIZATION")
                .help("Normalization method to use, overriding the params file")
                .short('n')
                .long("norm")
                .value_parser(["seuratlog", "cellranger", "logtransform", "none"]),
        )
        .arg(
            Arg::new("NUM_FEATURES")
                .help("Number of variable features to correlate over, 0 for all shared features")
                .long("num-features")
                .value_parser(value_parser!(usize)),
        )
        .arg(
            Arg::new("TRANSFER_LABELS")
                .help("Also call a reference label for every query cell")
                .long("transfer-labels")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("WRITE_SUMMARIES")
                .help("Also write the query and reference group means")
                .long("write-summaries")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("OUT_DIR")
                .help("Output directory")
                .short('o')
                .long("out_dir")
                .default_value(".")
                .value_parser(value_parser!(PathBuf)),
        )
        .get_matches();

    let mut params = match matches.get_one::<PathBuf>("PARAMS") {
        Some(path) => PipelineParams::from_json(path)?,
        None => PipelineParams::default(),
    };
    if let Some(norm) = matches.get_one::<String>("NORMALIZATION") {
        params.normalization = norm.parse::<Normalization>()?;
    }
    if let Some(&n) = matches.get_one::<usize>("NUM_FEATURES") {
        params.n_variable_features = n;
    }

    let query_dirs = paths(&matches, "QUERY");
    let query_ids = matches
        .get_many::<String>("QUERY_ID")
        .map(|v| v.cloned().collect::<Vec<_>>());
    if let Some(ids) = &query_ids {
        if ids.len() != query_dirs.len() {
            bail!("{} --query-id values for {} --query directories", ids.len(), query_dirs.len());
        }
    }
    let query = DatasetInput {
        name: "query".to_string(),
        matrices: query_dirs,
        sample_ids: query_ids,
        metadata: paths(&matches, "QUERY_METADATA"),
        label_column: required(&matches, "QUERY_LABEL")?.clone(),
    };

    let reference = match matches.get_one::<PathBuf>("REFERENCE_SUMMARY") {
        Some(path) => ReferenceInput::Summary {
            name: "reference".to_string(),
            path: path.clone(),
        },
        None => ReferenceInput::Dataset(DatasetInput {
            name: "reference".to_string(),
            matrices: paths(&matches, "REFERENCE"),
            sample_ids: None,
            metadata: paths(&matches, "REFERENCE_METADATA"),
            label_column: required(&matches, "REFERENCE_LABEL")?.clone(),
        }),
    };

    let features = match matches.get_one::<PathBuf>("FEATURES") {
        Some(path) => Some(load_feature_list(path)?),
        None => None,
    };

    let out_dir = matches.get_one::<PathBuf>("OUT_DIR").context("missing output directory")?;
    let comparison = run(
        &query,
        &reference,
        features,
        &params,
        matches.get_flag("TRANSFER_LABELS"),
    )?;
    write_outputs(&comparison, &params, out_dir)?;

    if matches.get_flag("WRITE_SUMMARIES") {
        comparison.query.summary.write_csv(out_dir.join("query_summary.csv"))?;
        comparison
            .reference_summary
            .write_csv(out_dir.join("reference_summary.csv"))?;
    }

    for m in &comparison.matches {
        info!(
            "{} -> {} ({:.3})",
            m.label,
            m.best.as_deref().unwrap_or("NA"),
            m.correlation
        );
    }
    Ok(())
}
