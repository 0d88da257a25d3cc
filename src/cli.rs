use std::cell::RefCell;
use std::error::Error;
use std::fs;
use std::io::{self, BufRead, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use atty::Stream;
use clap::{Parser, Subcommand};
use gelex_rs::{
    AnnotationMap, BoardOptions, ReportError, ReviewBoard, ReviewError, ReviewMode, ReviewResult,
    ReviewStatus, SubmissionContext, Toggle, Token, align,
};
use termimad::{FmtText, MadSkin, terminal_size};

#[derive(Parser, Debug)]
#[command(name = "gelex-rs", about = "Find the changes in an improved recipe", version)]
pub struct Cli {
    /// Emit JSON instead of human-readable output.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Split a recipe into reviewable words or sentences.
    Align {
        /// Recipe file, or `-` for stdin.
        input: String,
        #[arg(short, long, default_value_t = ReviewMode::Word)]
        mode: ReviewMode,
        /// Backend annotations (JSON object of `word: [[stem, index], ...]`).
        #[arg(short, long)]
        annotations: Option<PathBuf>,
    },
    /// Play a round in the terminal against a stored backend response.
    Play {
        /// Improved recipe file, or `-` for stdin.
        recipe: String,
        #[arg(short, long)]
        annotations: PathBuf,
        #[arg(short, long, default_value_t = ReviewMode::Word)]
        mode: ReviewMode,
    },
    /// Run the web game.
    #[cfg(feature = "web")]
    Serve(serve::ServeArgs),
}

pub fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    match cli.command {
        Command::Align {
            input,
            mode,
            annotations,
        } => handle_align(&input, mode, annotations.as_deref(), cli.json),
        Command::Play {
            recipe,
            annotations,
            mode,
        } => handle_play(&recipe, &annotations, mode, cli.json),
        #[cfg(feature = "web")]
        Command::Serve(args) => serve::run(args),
    }
}

fn read_input(source: &str) -> Result<String, Box<dyn Error>> {
    if source == "-" {
        let mut text = String::new();
        io::stdin().read_to_string(&mut text)?;
        return Ok(text);
    }
    fs::read_to_string(source).map_err(|err| format!("Failed to read {source:?}: {err}").into())
}

fn read_annotations(path: &Path) -> Result<AnnotationMap, Box<dyn Error>> {
    let raw = fs::read_to_string(path)
        .map_err(|err| format!("Failed to read annotations {}: {err}", path.display()))?;
    Ok(AnnotationMap::from_json_str(&raw)?)
}

fn handle_align(
    input: &str,
    mode: ReviewMode,
    annotations: Option<&Path>,
    as_json: bool,
) -> Result<(), Box<dyn Error>> {
    let text = read_input(input)?;
    let annotations = match annotations {
        Some(path) => read_annotations(path)?,
        None => AnnotationMap::new(),
    };
    let alignment = align(&text, mode, &annotations.annotated_indices());

    if as_json {
        println!("{}", serde_json::to_string_pretty(&alignment)?);
        return Ok(());
    }
    if alignment.is_empty() {
        println!("Nothing to align.");
        return Ok(());
    }
    let rows: Vec<(usize, &Token)> = alignment
        .lines()
        .into_iter()
        .enumerate()
        .flat_map(|(line, tokens)| tokens.into_iter().map(move |token| (line + 1, token)))
        .collect();
    let width = rows
        .iter()
        .map(|(_, token)| token.index.to_string().len())
        .max()
        .unwrap_or(1)
        .max("INDEX".len());
    println!(
        "{} {} ({} annotated)",
        alignment.token_count(),
        mode.unit_label(true),
        annotations.annotated_indices().len()
    );
    println!("{:<width$}  {:<4}  {:<3}  {}", "INDEX", "LINE", "NEW", "TEXT", width = width);
    println!("{:-<width$}  {:-<4}  {:-<3}  {}", "", "", "", "----", width = width);
    for (line, token) in rows {
        let marker = if token.annotated { "*" } else { "" };
        println!(
            "{:<width$}  {:<4}  {:<3}  {}",
            token.index,
            line,
            marker,
            token.text,
            width = width
        );
    }
    Ok(())
}

fn handle_play(
    recipe: &str,
    annotations: &Path,
    mode: ReviewMode,
    as_json: bool,
) -> Result<(), Box<dyn Error>> {
    let text = read_input(recipe)?;
    let annotations = read_annotations(annotations)?;
    let mut board = ReviewBoard::new(text, mode, annotations, BoardOptions::default());
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let styled = stdout_is_tty() && !as_json;
    if let Some(result) = play(&mut board, stdin.lock(), &mut stdout, styled)? {
        println!("{}", serde_json::to_string_pretty(&result)?);
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PlayCommand {
    Toggle(usize),
    Accept(usize),
    Decline(usize),
    RevealNext,
    RevealAll,
    Show,
    Finish,
    Quit,
    Help,
}

fn parse_command(line: &str) -> Result<PlayCommand, String> {
    let mut parts = line.split_whitespace();
    let verb = parts.next().unwrap_or_default();
    let index = |arg: Option<&str>| -> Result<usize, String> {
        let raw = arg.ok_or_else(|| format!("`{verb}` needs an index"))?;
        raw.parse()
            .map_err(|_| format!("Failed to parse index from {raw:?}"))
    };
    let command = match verb {
        "t" | "toggle" => PlayCommand::Toggle(index(parts.next())?),
        "a" | "accept" => PlayCommand::Accept(index(parts.next())?),
        "d" | "decline" => PlayCommand::Decline(index(parts.next())?),
        "next" => PlayCommand::RevealNext,
        "all" => PlayCommand::RevealAll,
        "show" | "" => PlayCommand::Show,
        "finish" => PlayCommand::Finish,
        "quit" | "q" => PlayCommand::Quit,
        "help" | "?" => PlayCommand::Help,
        other => return Err(format!("Unknown command {other:?}; try `help`")),
    };
    Ok(command)
}

/// Drives one board from line-based input. Returns the packaged result when
/// the player finishes, `None` when they quit or input ends.
fn play<R, W>(
    board: &mut ReviewBoard,
    input: R,
    out: &mut W,
    styled: bool,
) -> Result<Option<ReviewResult>, Box<dyn Error>>
where
    R: BufRead,
    W: Write,
{
    writeln!(
        out,
        "Find the {} that changed. Type `help` for commands.",
        board.mode().unit_label(true)
    )?;
    render_board(board, out, styled)?;
    for line in input.lines() {
        let line = line?;
        board.tick(Instant::now());
        let command = match parse_command(&line) {
            Ok(command) => command,
            Err(message) => {
                writeln!(out, "{message}")?;
                continue;
            }
        };
        match command {
            PlayCommand::Toggle(index) => match board.toggle(index) {
                Toggle::Found => {
                    writeln!(out, "{}", board.explanation_text(index))?;
                    writeln!(out, "Do you like this change? `a {index}` or `d {index}`")?;
                }
                Toggle::Missed(_) => writeln!(out, "Not a change, try again.")?,
            },
            PlayCommand::Accept(index) => board.accept(index),
            PlayCommand::Decline(index) => board.decline(index),
            PlayCommand::RevealNext => match board.reveal_next() {
                Some(index) => writeln!(out, "{}", board.explanation_text(index))?,
                None => writeln!(out, "Nothing left to reveal.")?,
            },
            PlayCommand::RevealAll => {
                let revealed = board.reveal_all();
                writeln!(out, "Revealed {revealed} change(s).")?;
            }
            PlayCommand::Show => {}
            PlayCommand::Help => {
                writeln!(
                    out,
                    "t N toggle • a N accept • d N decline • next • all • show • finish • quit"
                )?;
                continue;
            }
            PlayCommand::Finish => {
                let captured = RefCell::new(None);
                let outcome = board.finish(
                    &|result: ReviewResult| -> Result<(), ReportError> {
                        *captured.borrow_mut() = Some(result);
                        Ok(())
                    },
                    SubmissionContext::now(),
                );
                match outcome {
                    Ok(()) => return Ok(captured.into_inner()),
                    Err(ReviewError::NotFinished { remaining }) => {
                        writeln!(out, "{remaining} change(s) still need a decision.")?;
                        continue;
                    }
                    Err(err) => return Err(err.into()),
                }
            }
            PlayCommand::Quit => return Ok(None),
        }
        render_board(board, out, styled)?;
        if board.is_complete() {
            writeln!(out, "All changes found! Type `finish` to submit.")?;
        }
    }
    Ok(None)
}

fn render_board<W: Write>(board: &ReviewBoard, out: &mut W, styled: bool) -> io::Result<()> {
    if board.is_skipped() {
        writeln!(out, "No changes were made to this recipe. Type `finish` to submit.")?;
        return Ok(());
    }
    let lines = board.alignment().lines();
    let body = lines
        .iter()
        .map(|line| {
            line.iter()
                .map(|token| token_label(token, board.status(token.index), styled))
                .collect::<Vec<_>>()
                .join(" ")
        })
        .collect::<Vec<_>>()
        .join("\n");
    let progress = format!(
        "{} of {} changes resolved",
        board.resolved_count(),
        board.annotated().len()
    );
    if styled {
        let skin = markdown_skin();
        let formatted = FmtText::from(&skin, &body, Some(markdown_width()));
        writeln!(out, "\n{formatted}")?;
    } else {
        writeln!(out, "\n{body}")?;
    }
    writeln!(out, "{progress}")
}

fn token_label(token: &Token, status: Option<ReviewStatus>, styled: bool) -> String {
    if styled {
        let text = format!("{}#{}", token.text, token.index);
        return match status {
            None => text,
            Some(ReviewStatus::Correct) => format!("*{text}*"),
            Some(ReviewStatus::Incorrect) => format!("`{text}`"),
            Some(ReviewStatus::Accepted) => format!("**{text}**"),
            Some(ReviewStatus::Declined) => format!("~~{text}~~"),
        };
    }
    match status {
        None => format!("{}#{}", token.text, token.index),
        Some(status) => format!("{}#{}[{status}]", token.text, token.index),
    }
}

fn stdout_is_tty() -> bool {
    atty::is(Stream::Stdout)
}

fn markdown_width() -> usize {
    let (width, _) = terminal_size();
    width.max(60) as usize
}

fn markdown_skin() -> MadSkin {
    MadSkin::default()
}

#[cfg(feature = "web")]
mod serve {
    use super::*;
    use gelex_rs::EmptyAnnotationPolicy;
    use gelex_rs::web::{WebConfig, serve};
    use std::net::SocketAddr;
    use std::time::Duration;
    use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

    const DEFAULT_LOG_FILTER: &str = "gelex_rs=info,tower_http=info";

    #[derive(clap::Args, Debug)]
    pub struct ServeArgs {
        #[arg(long, env = "GELEX_ADDR", default_value = "127.0.0.1:8080")]
        addr: SocketAddr,
        /// Public URL of this server; defaults to `http://<addr>`.
        #[arg(long, env = "GELEX_BASE_URL")]
        base_url: Option<String>,
        /// WebSocket endpoint of the recipe-improvement service.
        #[arg(long, env = "GELEX_BACKEND_WS")]
        backend_ws: Option<String>,
        /// HTTP base of the service; results are POSTed to `<base>/trace`.
        #[arg(long, env = "GELEX_BACKEND_HTTP")]
        backend_http: Option<String>,
        /// Append reported results to this JSON-lines file.
        #[arg(long, env = "GELEX_TRACE_LOG")]
        trace_log: Option<PathBuf>,
        #[arg(long, env = "GELEX_RECONNECT_MS", default_value_t = 1000)]
        reconnect_ms: u64,
        #[arg(long, env = "GELEX_MAX_SESSIONS", default_value_t = 1024)]
        max_sessions: usize,
        /// What a recipe without changes does: `complete` or `skip`.
        #[arg(long, env = "GELEX_EMPTY_ANNOTATIONS", default_value = "complete")]
        empty_annotations: EmptyAnnotationPolicy,
    }

    impl ServeArgs {
        fn into_config(self) -> WebConfig {
            WebConfig {
                base_url: self
                    .base_url
                    .unwrap_or_else(|| format!("http://{}", self.addr)),
                addr: self.addr,
                backend_ws_url: self.backend_ws,
                backend_http_url: self.backend_http,
                trace_log: self.trace_log,
                reconnect_delay: Duration::from_millis(self.reconnect_ms),
                max_sessions: self.max_sessions,
                empty_annotations: self.empty_annotations,
            }
        }
    }

    pub fn run(args: ServeArgs) -> Result<(), Box<dyn Error>> {
        let _ = tracing_subscriber::registry()
            .with(
                EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
            )
            .with(tracing_subscriber::fmt::layer())
            .try_init();
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()?;
        runtime.block_on(serve(args.into_config()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn board() -> ReviewBoard {
        let mut annotations = AnnotationMap::new();
        annotations.insert("smoked", "smoke", 1);
        annotations.insert("paprika", "paprika", 2);
        ReviewBoard::new(
            "Add smoked paprika",
            ReviewMode::Word,
            annotations,
            BoardOptions::default(),
        )
    }

    fn run_script(board: &mut ReviewBoard, script: &str) -> (Option<ReviewResult>, String) {
        let mut out = Vec::new();
        let result = play(board, script.as_bytes(), &mut out, false).unwrap();
        (result, String::from_utf8(out).unwrap())
    }

    #[test]
    fn parses_commands() {
        assert_eq!(parse_command("t 3"), Ok(PlayCommand::Toggle(3)));
        assert_eq!(parse_command("  accept 0 "), Ok(PlayCommand::Accept(0)));
        assert_eq!(parse_command(""), Ok(PlayCommand::Show));
        assert!(parse_command("d").is_err());
        assert!(parse_command("t x").is_err());
        assert!(parse_command("dance").is_err());
    }

    #[test]
    fn finish_waits_for_every_decision() {
        let mut board = board();
        let (result, transcript) = run_script(&mut board, "t 1\na 1\nfinish\nquit\n");
        assert!(result.is_none());
        assert!(transcript.contains("Explanation for smoked"));
        assert!(transcript.contains("1 change(s) still need a decision."));
        assert!(transcript.contains("smoked#1[accepted]"));
    }

    #[test]
    fn finished_round_returns_the_result() {
        let mut board = board();
        let (result, transcript) = run_script(&mut board, "t 0\nall\na 1\nd 2\nfinish\n");
        assert!(transcript.contains("Not a change, try again."));
        assert!(transcript.contains("All changes found!"));
        let result = result.expect("finished");
        assert_eq!(result.selected_indexes.get(&2), Some(&ReviewStatus::Declined));
        assert_eq!(result.improved_recipe, "Add smoked paprika");
        assert_eq!(result.mode, ReviewMode::Word);
    }
}
