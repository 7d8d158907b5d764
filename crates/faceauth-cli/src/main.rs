use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use faceauth_core::{AuthError, AuthOutcome, DenialReason, Frame, LivenessOutcome, SessionOrchestrator};
use tracing_subscriber::EnvFilter;

mod config;
mod replay;
mod store;
mod ui;

use config::Config;
use replay::{ReplayCameras, ReplayProvider, ReplayScript};
use store::FileEncodingStore;
use ui::TerminalUi;

#[derive(Parser)]
#[command(name = "faceauth", version, about = "Face verification with an active liveness challenge")]
struct Cli {
    /// TOML configuration file (overrides FACEAUTH_CONFIG).
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Replay script supplying face, landmark and hand data for headless runs.
    #[arg(long, global = true)]
    script: Option<PathBuf>,
    /// State directory (overrides config and FACEAUTH_STATE_DIR).
    #[arg(long, global = true)]
    state_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Full application flow: clear saved state, enroll the image, authenticate.
    Session { image: PathBuf },
    /// Save the first face found in an image as the enrolled face.
    Enroll { image: PathBuf },
    /// Compare the face in front of the camera with the enrolled one.
    Verify,
    /// Run only the eye-closure and hand-gesture challenge.
    Liveness,
    /// Verify, then run the liveness challenge.
    Authenticate,
    /// Delete the enrolled face and its preview.
    Reset,
    /// Print the stored enrollment state as JSON.
    Status,
}

/// Process exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Exit {
    Authenticated = 0,
    VerificationFailed = 1,
    LivenessFailed = 2,
    NotEnrolled = 3,
}

impl From<Exit> for ExitCode {
    fn from(exit: Exit) -> Self {
        ExitCode::from(exit as u8)
    }
}

type Orchestrator = SessionOrchestrator<ReplayProvider, ReplayCameras, FileEncodingStore>;

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(exit) => {
            tracing::debug!(?exit, "faceauth finished");
            exit.into()
        }
        Err(e) => {
            tracing::error!(error = %e, "faceauth failed");
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<Exit> {
    let mut config = Config::load(cli.config.as_deref()).context("failed to load configuration")?;
    if let Some(dir) = cli.state_dir {
        config.state_dir = dir;
    }

    let store = FileEncodingStore::open(&config.state_dir)
        .with_context(|| format!("failed to open state directory {}", config.state_dir.display()))?;
    tracing::info!(state_dir = %store.dir().display(), "faceauth starting");

    let needs_features = !matches!(cli.command, Command::Reset | Command::Status);
    let script = match &cli.script {
        Some(path) => ReplayScript::from_path(path)?,
        None if needs_features => bail!("no feature provider available: pass --script <replay.json>"),
        None => ReplayScript::default(),
    };
    let (provider, cameras, quit) = replay::replay(script, &config.eye_layout)?;

    let mut orchestrator = SessionOrchestrator::new(provider, cameras, store, config.session_params());
    let mut ui = TerminalUi::stdout().with_quit_signal(quit);

    match cli.command {
        Command::Session { image } => {
            // A new application session never sees a previous user's face.
            orchestrator.reset(&mut ui)?;
            if let Some(exit) = enroll(&mut orchestrator, &image, &mut ui)? {
                return Ok(exit);
            }
            authenticate(&mut orchestrator, &mut ui)
        }
        Command::Enroll { image } => Ok(enroll(&mut orchestrator, &image, &mut ui)?.unwrap_or(Exit::Authenticated)),
        Command::Verify => match orchestrator.verify(&mut ui) {
            Ok(outcome) if outcome.is_match() => Ok(Exit::Authenticated),
            Ok(_) => Ok(Exit::VerificationFailed),
            Err(e) => verification_error(e),
        },
        Command::Liveness => Ok(match orchestrator.run_liveness(&mut ui)? {
            LivenessOutcome::Passed => Exit::Authenticated,
            LivenessOutcome::Failed(_) => Exit::LivenessFailed,
        }),
        Command::Authenticate => authenticate(&mut orchestrator, &mut ui),
        Command::Reset => {
            orchestrator.reset(&mut ui)?;
            Ok(Exit::Authenticated)
        }
        Command::Status => {
            let status = orchestrator.store().status().context("failed to read stored encoding")?;
            println!("{}", serde_json::to_string_pretty(&status)?);
            Ok(Exit::Authenticated)
        }
    }
}

/// Enroll from an image file. `Some(exit)` when enrollment was rejected.
fn enroll(orchestrator: &mut Orchestrator, path: &Path, ui: &mut TerminalUi<std::io::Stdout>) -> Result<Option<Exit>> {
    let still = image::open(path)
        .with_context(|| format!("failed to load image {}", path.display()))?
        .to_rgb8();

    match orchestrator.enroll(&Frame::still(still), ui) {
        Ok(enrollment) => {
            tracing::info!(
                faces = enrollment.faces_detected,
                preview = %orchestrator.store().preview_path().display(),
                "enrolled"
            );
            Ok(None)
        }
        Err(AuthError::NoFaceFound) => Ok(Some(Exit::VerificationFailed)),
        Err(e) => Err(e.into()),
    }
}

fn authenticate(orchestrator: &mut Orchestrator, ui: &mut TerminalUi<std::io::Stdout>) -> Result<Exit> {
    match orchestrator.authenticate(ui) {
        Ok(AuthOutcome::AccessGranted) => Ok(Exit::Authenticated),
        Ok(AuthOutcome::AccessDenied(DenialReason::VerificationFailed { distance })) => {
            tracing::info!(?distance, "access denied: verification failed");
            Ok(Exit::VerificationFailed)
        }
        Ok(AuthOutcome::AccessDenied(DenialReason::LivenessFailed(reason))) => {
            tracing::info!(?reason, "access denied: liveness failed");
            Ok(Exit::LivenessFailed)
        }
        Err(e) => verification_error(e),
    }
}

fn verification_error(err: AuthError) -> Result<Exit> {
    match err {
        AuthError::NotEnrolled => Ok(Exit::NotEnrolled),
        e if e.is_fatal() => Err(e.into()),
        e => {
            tracing::info!(error = %e, "verification did not complete");
            Ok(Exit::VerificationFailed)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(Exit::Authenticated as u8, 0);
        assert_eq!(Exit::VerificationFailed as u8, 1);
        assert_eq!(Exit::LivenessFailed as u8, 2);
        assert_eq!(Exit::NotEnrolled as u8, 3);
    }

    #[test]
    fn test_verification_error_mapping() {
        assert_eq!(verification_error(AuthError::NotEnrolled).unwrap(), Exit::NotEnrolled);
        assert_eq!(verification_error(AuthError::NoFaceFound).unwrap(), Exit::VerificationFailed);
        assert_eq!(verification_error(AuthError::Aborted).unwrap(), Exit::VerificationFailed);
        assert!(verification_error(AuthError::store(std::io::Error::other("disk"))).is_err());
    }

    #[test]
    fn test_cli_parses_global_flags() {
        let cli = Cli::try_parse_from(["faceauth", "verify", "--script", "run.json", "--state-dir", "/tmp/fa"]).unwrap();
        assert!(matches!(cli.command, Command::Verify));
        assert_eq!(cli.script, Some(PathBuf::from("run.json")));
        assert_eq!(cli.state_dir, Some(PathBuf::from("/tmp/fa")));

        let cli = Cli::try_parse_from(["faceauth", "session", "me.jpg"]).unwrap();
        assert!(matches!(cli.command, Command::Session { ref image } if image == Path::new("me.jpg")));
    }

    fn demo(name: &str) -> String {
        Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("../../demos")
            .join(name)
            .display()
            .to_string()
    }

    fn run_args(args: &[&str]) -> Exit {
        let cli = Cli::try_parse_from(std::iter::once("faceauth").chain(args.iter().copied())).unwrap();
        run(cli).unwrap()
    }

    #[test]
    fn test_demo_sessions() {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let dir = std::env::temp_dir().join(format!("faceauth-cli-{nanos}"));
        std::fs::create_dir_all(&dir).unwrap();
        let still = dir.join("still.png");
        image::RgbImage::new(320, 240).save(&still).unwrap();
        let still = still.display().to_string();
        let state = dir.join("state").display().to_string();

        for (script, expected) in [
            ("granted.json", Exit::Authenticated),
            ("impostor.json", Exit::VerificationFailed),
            ("photo_attack.json", Exit::LivenessFailed),
        ] {
            let script = demo(script);
            let exit = run_args(&["session", &still, "--script", &script, "--state-dir", &state]);
            assert_eq!(exit, expected, "{script}");
        }

        assert!(Path::new(&state).join(store::PREVIEW_FILE).exists());
        assert_eq!(run_args(&["reset", "--state-dir", &state]), Exit::Authenticated);
        assert!(!Path::new(&state).join(store::ENCODING_FILE).exists());

        let granted = demo("granted.json");
        assert_eq!(
            run_args(&["authenticate", "--script", &granted, "--state-dir", &state]),
            Exit::NotEnrolled
        );

        std::fs::remove_dir_all(&dir).ok();
    }
}
