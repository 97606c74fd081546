use argh::FromArgs;
use radiograph_analyst::{
    AnalysisConfig, AnalysisRequester, DecodeError, GeminiProvider, RawUpload, SkippedUpload,
    UploadBatch,
};
use std::{path::PathBuf, process::ExitCode};

#[derive(FromArgs)]
/// Analyse radiograph images with a multimodal model.
struct AnalyzeArgs {
    /// image files to analyse together
    #[argh(positional)]
    images: Vec<PathBuf>,
}

fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    env_logger::init();
    let args: AnalyzeArgs = argh::from_env();

    let config = AnalysisConfig::from_env()?;
    let provider = GeminiProvider::from_config(&config)?;

    let mut uploads = Vec::new();
    let mut unreadable = Vec::new();
    for path in &args.images {
        match RawUpload::from_path(path) {
            Ok(upload) => uploads.push(upload),
            Err(e) => unreadable.push(SkippedUpload {
                filename: path.display().to_string(),
                reason: DecodeError::Io(e),
            }),
        }
    }

    let (batch, mut skipped) = UploadBatch::collect(uploads);
    skipped.extend(unreadable);
    for SkippedUpload { filename, reason } in &skipped {
        eprintln!("Invalid file: {filename} ({reason})");
    }
    for item in &batch {
        let (width, height) = item.dimensions();
        println!("{} ({} bytes, {width}x{height})", item.filename(), item.size());
    }

    let mut requester = AnalysisRequester::new(&config, provider);
    let outcome = requester.analyze(&batch);
    println!("\n{outcome}");

    Ok(if outcome.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
