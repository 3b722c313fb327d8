extern crate log;
extern crate pretty_env_logger;

use std::path::PathBuf;
use std::process::exit;

use ballot_interpreter::election::Election;
use ballot_interpreter::image_utils::Threshold;
use ballot_interpreter::{InterpretedBallot, Interpreter, InterpreterOptions};
use clap::{arg, command, value_parser, ArgAction, Command};
use log::{info, warn};

fn main() {
    pretty_env_logger::init_custom_env("LOG");

    let matches = cli().get_matches();
    let debug = matches.get_flag("debug");
    let test_mode = matches.get_flag("test-mode");
    let print_layouts = matches.get_flag("print-layouts");
    let election_definition_path = match matches.get_one::<PathBuf>("election") {
        Some(path) => path,
        None => {
            eprintln!("Error: election path is required");
            exit(1);
        }
    };
    let template_paths = matches
        .get_many::<PathBuf>("template")
        .map(|paths| paths.cloned().collect::<Vec<_>>())
        .unwrap_or_default();
    let ballot_paths = matches
        .get_many::<PathBuf>("ballot_paths")
        .map(|paths| paths.cloned().collect::<Vec<_>>())
        .unwrap_or_default();

    let election_definition_json = match std::fs::read_to_string(election_definition_path) {
        Ok(json) => json,
        Err(e) => {
            eprintln!("Error reading election definition: {}", e);
            exit(1);
        }
    };

    let election: Election = match serde_json::from_str(&election_definition_json) {
        Ok(election_definition) => election_definition,
        Err(e) => {
            eprintln!("Error parsing election definition: {}", e);
            exit(1);
        }
    };

    let mut options = InterpreterOptions {
        test_mode,
        debug,
        ..InterpreterOptions::default()
    };
    if let Some(threshold) = matches.get_one::<f32>("threshold") {
        options.mark_score_vote_threshold = *threshold;
    }
    if let Some(level) = matches.get_one::<u8>("binarize") {
        options.binarize_threshold = Threshold::Fixed(*level);
    }

    let mut interpreter = Interpreter::new(election, options);

    for template_path in &template_paths {
        match interpreter.add_template_file(template_path) {
            Ok(metadata) => info!("added template {}: {:?}", template_path.display(), metadata),
            Err(e) => {
                eprintln!("Error adding template {}: {}", template_path.display(), e);
                exit(1);
            }
        }
    }

    let missing: Vec<_> = interpreter.missing_templates().take(10).collect();
    if !missing.is_empty() {
        warn!("template(s) still missing, including: {:?}", missing);
    }

    let mut failed = false;
    let results = interpreter.interpret_files(&ballot_paths);
    for (ballot_path, result) in ballot_paths.iter().zip(results) {
        let path = ballot_path.display();
        let interpreted = match result {
            Ok(interpreted) => interpreted,
            Err(e) => {
                eprintln!("Error interpreting {}: {}", path, e);
                failed = true;
                continue;
            }
        };

        if print_layouts {
            if let InterpretedBallot::HandMarked { layout, .. } = &interpreted {
                match serde_json::to_string(layout) {
                    Ok(json) => eprintln!("{}", json),
                    Err(e) => eprintln!("Error serializing layout of {}: {}", path, e),
                }
            }
        }

        match serde_json::to_string(interpreted.cvr()) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                eprintln!("Error serializing vote record for {}: {}", path, e);
                failed = true;
            }
        }
    }

    if failed {
        exit(1);
    }
}

#[allow(clippy::cognitive_complexity)]
fn cli() -> Command {
    command!()
        .arg(
            arg!(-e --election <PATH> "Path to election.json file")
                .required(true)
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            arg!(-t --template <TEMPLATE_IMAGE> "Path to an image of a blank ballot page")
                .action(ArgAction::Append)
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(arg!(--"test-mode" "Accept only test ballots"))
        .arg(
            arg!(--threshold <SCORE> "Highest mark score (1 - fill ratio) that is a vote")
                .long_help(
                    "Highest mark score that counts as a vote. A mark's score is 1 minus \
                     its fill ratio, so the default of 0.2 only counts targets that are \
                     at least 80% filled in.",
                )
                .default_value("0.2")
                .value_parser(value_parser!(f32)),
        )
        .arg(
            arg!(--binarize <LEVEL> "Fixed luma level separating ink from paper (default: Otsu)")
                .value_parser(value_parser!(u8)),
        )
        .arg(arg!(-d --debug "Write debug images next to inputs"))
        .arg(
            arg!(--"print-layouts" "Print the located layout of each hand-marked ballot to stderr")
                .action(ArgAction::SetTrue),
        )
        .arg(
            arg!(ballot_paths: <BALLOT_IMAGE> "Paths to ballot images to interpret")
                .num_args(1..)
                .value_parser(value_parser!(PathBuf)),
        )
}
