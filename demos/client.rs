use argh::FromArgs;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use std::path::PathBuf;

mod messages;

// defaults for the client
const DEFAULT_HOST: &str = "localhost";
const DEFAULT_PORT: u16 = 3000;

#[derive(FromArgs)]
/// Client for the radiograph analysis server
struct ClientArgs {
    /// the host to connect to
    #[argh(option, short = 'h', default = "DEFAULT_HOST.to_string()")]
    host: String,

    /// the port to connect to
    #[argh(option, short = 'p', default = "DEFAULT_PORT")]
    port: u16,

    /// command to execute: "analyze" or "result"
    #[argh(subcommand)]
    command: ClientCommands,
}

#[derive(FromArgs)]
#[argh(subcommand)]
enum ClientCommands {
    Analyze(AnalyzeCommand),
    Result(ResultCommand),
}

#[derive(FromArgs)]
/// Upload radiographs and schedule their analysis
#[argh(subcommand, name = "analyze")]
struct AnalyzeCommand {
    /// path to an image, repeat for several
    #[argh(option, short = 'i')]
    image_path: Vec<PathBuf>,
}

#[derive(FromArgs)]
/// Fetch the analysis result
#[argh(subcommand, name = "result")]
struct ResultCommand {}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: ClientArgs = argh::from_env();

    let client = reqwest::Client::new();

    // format the host and port
    let addr = format!("{}:{}", args.host, args.port);

    let response = match args.command {
        ClientCommands::Analyze(analyze_command) => {
            let mut images = Vec::with_capacity(analyze_command.image_path.len());
            for path in &analyze_command.image_path {
                let bytes = tokio::fs::read(path).await?;
                images.push(messages::UploadedImage {
                    filename: path
                        .file_name()
                        .map(|name| name.to_string_lossy().into_owned())
                        .unwrap_or_else(|| path.display().to_string()),
                    data: STANDARD.encode(bytes),
                });
            }

            client
                .post(format!("http://{}/analyze", addr))
                .json(&messages::AnalyzeRequest { images })
                .send()
                .await?
        }
        ClientCommands::Result(_) => {
            client
                .get(format!("http://{}/result", addr))
                .send()
                .await?
        }
    };

    let result = response.json::<serde_json::Value>().await?;
    println!("Result: {}", serde_json::to_string_pretty(&result)?);

    Ok(())
}
