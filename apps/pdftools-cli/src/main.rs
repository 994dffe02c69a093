//! pdftools CLI - merge, split, convert, edit and protect PDF files
//!
//! Every subcommand reads its inputs from disk, runs one toolkit operation
//! and writes the result next to the current directory (or to `--output`).

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use base64::Engine as _;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use pdftools_core::command::Outcome;
use pdftools_core::edits::{ImagePlacement, SignaturePlacement, TextRun};
use pdftools_core::output::{derived_name, DerivedKind};
use pdftools_core::{
    extract_pages, get_page_count, load_with_password, parse_ranges, run, Annotation, Element,
    ImageFormat, InputFile, OutputFile, PageRange, PdfCommand, Permissions, RasterFormat, Rgb,
    ToolkitConfig,
};

#[derive(Parser, Debug)]
#[command(name = "pdftools")]
#[command(version, about = "Merge, split, convert, edit and protect PDF files", long_about = None)]
struct Cli {
    /// TOML configuration file (defaults apply when omitted)
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log at debug level (RUST_LOG is honoured otherwise)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Merge PDFs in the order given
    Merge {
        #[arg(value_name = "FILE", required = true)]
        inputs: Vec<PathBuf>,

        /// Output file or directory
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Split a PDF into one file per range
    Split {
        #[arg(value_name = "FILE")]
        input: PathBuf,

        /// Ranges, e.g. "1-3, 4-6"
        #[arg(short, long)]
        ranges: String,

        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Copy selected pages into a single PDF
    Extract {
        #[arg(value_name = "FILE")]
        input: PathBuf,

        /// Pages, e.g. "1-3, 5, 8-10"
        #[arg(short, long)]
        pages: String,

        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Drop unused objects and metadata, compress streams
    Compress {
        #[arg(value_name = "FILE")]
        input: PathBuf,

        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Build a PDF with one page per PNG or JPEG image
    ImagesToPdf {
        #[arg(value_name = "IMAGE", required = true)]
        images: Vec<PathBuf>,

        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Render every page to PNG or JPEG
    ToImages {
        #[arg(value_name = "FILE")]
        input: PathBuf,

        /// png or jpeg
        #[arg(short, long)]
        format: Option<RasterFormat>,

        /// Pixels per point
        #[arg(short, long)]
        scale: Option<f64>,

        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Draw a line of text; x/y are points from the page's top-left corner
    AddText {
        #[arg(value_name = "FILE")]
        input: PathBuf,

        #[arg(long)]
        page: u32,

        #[arg(short, long)]
        x: f64,

        #[arg(short, long)]
        y: f64,

        #[arg(short, long)]
        text: String,

        #[arg(long)]
        font_size: Option<f64>,

        /// Hex colour, e.g. "#1a2b3c"
        #[arg(long)]
        color: Option<String>,

        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Place a PNG or JPEG image with its top-left corner at x/y
    AddImage {
        #[arg(value_name = "FILE")]
        input: PathBuf,

        #[arg(short, long)]
        image: PathBuf,

        #[command(flatten)]
        area: AreaArgs,

        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Place a PNG signature image
    Sign {
        #[arg(value_name = "FILE")]
        input: PathBuf,

        /// PNG with a transparent background
        #[arg(short, long)]
        signature: PathBuf,

        #[command(flatten)]
        area: AreaArgs,

        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Add annotations from a JSON array
    Annotate {
        #[arg(value_name = "FILE")]
        input: PathBuf,

        #[arg(short, long, value_name = "JSON_FILE")]
        annotations: PathBuf,

        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Apply a JSON array of elements in one pass
    Edit {
        #[arg(value_name = "FILE")]
        input: PathBuf,

        #[arg(short, long, value_name = "JSON_FILE")]
        elements: PathBuf,

        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Encrypt with a user password
    Protect {
        #[arg(value_name = "FILE")]
        input: PathBuf,

        #[arg(short, long)]
        password: String,

        /// Owner password (defaults to the user password)
        #[arg(long)]
        owner_password: Option<String>,

        /// Forbid printing
        #[arg(long)]
        no_print: bool,

        /// Forbid copying text and images
        #[arg(long)]
        no_copy: bool,

        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Remove encryption
    Unlock {
        #[arg(value_name = "FILE")]
        input: PathBuf,

        #[arg(short, long)]
        password: String,

        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show page count and page sizes
    Info {
        #[arg(value_name = "FILE")]
        input: PathBuf,

        #[arg(short, long)]
        password: Option<String>,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Run a JSON command ("-" reads stdin)
    Run {
        #[arg(value_name = "JSON_FILE")]
        command: PathBuf,

        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print the effective configuration as TOML
    Config,
}

/// Page and box shared by the image and signature tools
#[derive(clap::Args, Debug)]
struct AreaArgs {
    #[arg(long)]
    page: u32,

    #[arg(short, long)]
    x: f64,

    #[arg(short, long)]
    y: f64,

    /// Width in points (configured default when omitted)
    #[arg(long)]
    width: Option<f64>,

    #[arg(long)]
    height: Option<f64>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = load_config(cli.config.as_deref())?;
    debug!(?config, "Configuration loaded");
    dispatch(cli.command, &config)
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    // Results may go to stdout; logs stay on stderr
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn load_config(path: Option<&Path>) -> Result<ToolkitConfig> {
    match path {
        Some(path) => ToolkitConfig::from_file(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display())),
        None => Ok(ToolkitConfig::default()),
    }
}

fn dispatch(command: Commands, config: &ToolkitConfig) -> Result<()> {
    match command {
        Commands::Merge { inputs, output } => {
            let files = inputs.iter().map(|p| read_input(p)).collect::<Result<_>>()?;
            finish(run(&PdfCommand::Merge { files }, config)?, output)
        }
        Commands::Split {
            input,
            ranges,
            output,
        } => {
            let ranges = PageRange::parse_list(&ranges)?
                .into_iter()
                .map(|range| (range.start, range.end))
                .collect();
            let file = read_input(&input)?;
            finish(run(&PdfCommand::Split { file, ranges }, config)?, output)
        }
        Commands::Extract {
            input,
            pages,
            output,
        } => {
            let file = read_input(&input)?;
            let pages = parse_ranges(&pages, get_page_count(&file.data)?)?;
            let bytes = extract_pages(&file.data, &pages)
                .with_context(|| format!("Failed to extract pages from {}", input.display()))?;
            let name = derived_name(DerivedKind::Extracted, &display_name(&input));
            write_output(&OutputFile::pdf(name, bytes), output.as_deref()).map(|_| ())
        }
        Commands::Compress { input, output } => {
            let file = read_input(&input)?;
            let before = file.data.len();
            let outcome = run(&PdfCommand::Compress { file }, config)?;
            info!(
                before = before,
                after = outcome.file.bytes.len(),
                "Compressed {}",
                input.display()
            );
            finish(outcome, output)
        }
        Commands::ImagesToPdf { images, output } => {
            let images = images.iter().map(|p| read_input(p)).collect::<Result<_>>()?;
            finish(run(&PdfCommand::ImagesToPdf { images }, config)?, output)
        }
        Commands::ToImages {
            input,
            format,
            scale,
            output,
        } => {
            let file = read_input(&input)?;
            finish(
                run(
                    &PdfCommand::ToImages {
                        file,
                        format,
                        scale,
                    },
                    config,
                )?,
                output,
            )
        }
        Commands::AddText {
            input,
            page,
            x,
            y,
            text,
            font_size,
            color,
            output,
        } => {
            let color = match color {
                Some(hex) => Rgb::from_hex(&hex)?,
                None => config.text.color,
            };
            let text = TextRun {
                page,
                x,
                y,
                text,
                font_size: font_size.unwrap_or(config.text.font_size),
                color,
            };
            let file = read_input(&input)?;
            finish(run(&PdfCommand::AddText { file, text }, config)?, output)
        }
        Commands::AddImage {
            input,
            image,
            area,
            output,
        } => {
            let data = read_bytes(&image)?;
            let format = ImageFormat::sniff(&data)
                .with_context(|| format!("{} is not a PNG or JPEG image", image.display()))?;
            let image = ImagePlacement {
                page: area.page,
                x: area.x,
                y: area.y,
                width: area.width.unwrap_or(config.image.width),
                height: area.height.unwrap_or(config.image.height),
                format,
                data,
            };
            let file = read_input(&input)?;
            finish(run(&PdfCommand::AddImage { file, image }, config)?, output)
        }
        Commands::Sign {
            input,
            signature,
            area,
            output,
        } => {
            let png = read_bytes(&signature)?;
            let signature = SignaturePlacement {
                page: area.page,
                x: area.x,
                y: area.y,
                width: area.width.unwrap_or(config.signature.width),
                height: area.height.unwrap_or(config.signature.height),
                data_url: png_data_url(&png),
            };
            let file = read_input(&input)?;
            finish(run(&PdfCommand::Sign { file, signature }, config)?, output)
        }
        Commands::Annotate {
            input,
            annotations,
            output,
        } => {
            let annotations: Vec<Annotation> = read_json(&annotations)?;
            let file = read_input(&input)?;
            finish(run(&PdfCommand::Annotate { file, annotations }, config)?, output)
        }
        Commands::Edit {
            input,
            elements,
            output,
        } => {
            let elements: Vec<Element> = read_json(&elements)?;
            let file = read_input(&input)?;
            finish(run(&PdfCommand::Edit { file, elements }, config)?, output)
        }
        Commands::Protect {
            input,
            password,
            owner_password,
            no_print,
            no_copy,
            output,
        } => {
            let permissions = Permissions {
                print: !no_print,
                print_high_quality: !no_print,
                copy: !no_copy,
                ..Permissions::default()
            };
            let file = read_input(&input)?;
            let command = PdfCommand::Protect {
                file,
                confirm_password: password.clone(),
                password,
                owner_password,
                permissions,
            };
            finish(run(&command, config)?, output)
        }
        Commands::Unlock {
            input,
            password,
            output,
        } => {
            let file = read_input(&input)?;
            finish(run(&PdfCommand::Unlock { file, password }, config)?, output)
        }
        Commands::Info {
            input,
            password,
            json,
        } => {
            let info = document_info(&read_bytes(&input)?, password.as_deref())?;
            if json {
                println!("{}", serde_json::to_string_pretty(&info)?);
            } else {
                print!("{}", info.render(&display_name(&input)));
            }
            Ok(())
        }
        Commands::Run { command, output } => {
            let json = if command.as_os_str() == "-" {
                let mut json = String::new();
                std::io::stdin()
                    .read_to_string(&mut json)
                    .context("Failed to read command from stdin")?;
                json
            } else {
                fs::read_to_string(&command)
                    .with_context(|| format!("Failed to read {}", command.display()))?
            };
            let command: PdfCommand =
                serde_json::from_str(&json).context("Failed to parse JSON command")?;
            info!(command = command.name(), "Running JSON command");
            finish(run(&command, config)?, output)
        }
        Commands::Config => {
            print!("{}", config.to_toml_string()?);
            Ok(())
        }
    }
}

fn finish(outcome: Outcome, output: Option<PathBuf>) -> Result<()> {
    let path = write_output(&outcome.file, output.as_deref())?;
    info!(
        pages = outcome.page_count,
        bytes = outcome.file.bytes.len(),
        "Wrote {}",
        path.display()
    );
    Ok(())
}

/// Write to `output` when it names a file, inside it when it is a directory,
/// or into the current directory under the tool's default name
fn write_output(file: &OutputFile, output: Option<&Path>) -> Result<PathBuf> {
    let path = match output {
        Some(dir) if dir.is_dir() => dir.join(&file.name),
        Some(path) => path.to_path_buf(),
        None => PathBuf::from(&file.name),
    };
    fs::write(&path, &file.bytes).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(path)
}

fn read_bytes(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).with_context(|| format!("Failed to read {}", path.display()))
}

fn read_input(path: &Path) -> Result<InputFile> {
    Ok(InputFile::new(display_name(path), read_bytes(path)?))
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("Invalid JSON in {}", path.display()))
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn png_data_url(png: &[u8]) -> String {
    format!(
        "data:image/png;base64,{}",
        base64::engine::general_purpose::STANDARD.encode(png)
    )
}

#[derive(Debug, Serialize)]
struct DocumentInfo {
    page_count: u32,
    encrypted: bool,
    pages: Vec<PageLine>,
}

#[derive(Debug, Serialize)]
struct PageLine {
    page: u32,
    width: f64,
    height: f64,
    rotation: i32,
}

impl DocumentInfo {
    fn render(&self, name: &str) -> String {
        let mut out = format!(
            "{}: {} page(s){}\n",
            name,
            self.page_count,
            if self.encrypted { ", encrypted" } else { "" }
        );
        for page in &self.pages {
            out.push_str(&format!(
                "  page {}: {} x {} pt",
                page.page, page.width, page.height
            ));
            if page.rotation != 0 {
                out.push_str(&format!(", rotated {}", page.rotation));
            }
            out.push('\n');
        }
        out
    }
}

fn document_info(bytes: &[u8], password: Option<&str>) -> Result<DocumentInfo> {
    let doc = match load_with_password(bytes, password) {
        Ok(doc) => doc,
        Err(e) if e.needs_password() => bail!("{} (pass --password)", e),
        Err(e) => return Err(e.into()),
    };
    let pages = (1..=doc.page_count())
        .map(|page| {
            let size = doc.page_size(page)?;
            Ok(PageLine {
                page,
                width: size.width,
                height: size.height,
                rotation: doc.page_rotation(page)?,
            })
        })
        .collect::<pdftools_core::Result<Vec<_>>>()?;
    Ok(DocumentInfo {
        page_count: doc.page_count(),
        encrypted: doc.was_encrypted(),
        pages,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pdftools_core::{archive::read_archive, images_to_document};
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn png(width: u32, height: u32) -> Vec<u8> {
        let mut out = Vec::new();
        {
            let mut encoder = png::Encoder::new(&mut out, width, height);
            encoder.set_color(png::ColorType::Rgba);
            encoder.set_depth(png::BitDepth::Eight);
            let mut writer = encoder.write_header().unwrap();
            writer
                .write_image_data(&vec![255u8; (width * height * 4) as usize])
                .unwrap();
        }
        out
    }

    /// A PDF with `pages` pages of 100 x 200 pt, written into `dir`
    fn write_pdf(dir: &TempDir, name: &str, pages: usize) -> PathBuf {
        let images: Vec<_> = (0..pages).map(|_| (png(100, 200), ImageFormat::Png)).collect();
        let path = dir.path().join(name);
        fs::write(&path, images_to_document(&images).unwrap()).unwrap();
        path
    }

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("pdftools").chain(args.iter().copied())).unwrap()
    }

    fn run_cli(args: &[&str]) -> Result<()> {
        let cli = parse(args);
        let config = load_config(cli.config.as_deref())?;
        dispatch(cli.command, &config)
    }

    #[test]
    fn test_parse_global_flags_after_subcommand() {
        let cli = parse(&["merge", "a.pdf", "b.pdf", "--verbose", "-c", "tools.toml"]);
        assert!(cli.verbose);
        assert_eq!(cli.config, Some(PathBuf::from("tools.toml")));
        match cli.command {
            Commands::Merge { inputs, output } => {
                assert_eq!(inputs.len(), 2);
                assert!(output.is_none());
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_rejects_missing_inputs() {
        assert!(Cli::try_parse_from(["pdftools", "merge"]).is_err());
        assert!(Cli::try_parse_from(["pdftools", "to-images", "a.pdf", "--format", "gif"]).is_err());
    }

    #[test]
    fn test_merge_into_directory_uses_default_name() {
        let dir = TempDir::new().unwrap();
        let a = write_pdf(&dir, "a.pdf", 2);
        let b = write_pdf(&dir, "b.pdf", 1);
        let out = dir.path().to_str().unwrap();

        run_cli(&["merge", a.to_str().unwrap(), b.to_str().unwrap(), "-o", out]).unwrap();
        let merged = fs::read(dir.path().join("merged.pdf")).unwrap();
        assert_eq!(get_page_count(&merged).unwrap(), 3);
    }

    #[test]
    fn test_split_and_extract() {
        let dir = TempDir::new().unwrap();
        let book = write_pdf(&dir, "book.pdf", 5);
        let zip = dir.path().join("parts.zip");

        run_cli(&[
            "split",
            book.to_str().unwrap(),
            "-r",
            "1-2, 3-5",
            "-o",
            zip.to_str().unwrap(),
        ])
        .unwrap();
        let entries = read_archive(&fs::read(&zip).unwrap()).unwrap();
        assert_eq!(entries.len(), 2);

        let out = dir.path().to_str().unwrap();
        run_cli(&["extract", book.to_str().unwrap(), "-p", "1, 4-5", "-o", out]).unwrap();
        let extracted = fs::read(dir.path().join("extracted_book.pdf")).unwrap();
        assert_eq!(get_page_count(&extracted).unwrap(), 3);
    }

    #[test]
    fn test_extract_open_ended_range_stops_at_last_page() {
        let dir = TempDir::new().unwrap();
        let book = write_pdf(&dir, "short.pdf", 3);
        let out = dir.path().join("all.pdf");

        run_cli(&[
            "extract",
            book.to_str().unwrap(),
            "-p",
            "1-4294967295",
            "-o",
            out.to_str().unwrap(),
        ])
        .unwrap();
        assert_eq!(get_page_count(&fs::read(&out).unwrap()).unwrap(), 3);
    }

    #[test]
    fn test_protect_unlock_and_info() {
        let dir = TempDir::new().unwrap();
        let doc = write_pdf(&dir, "doc.pdf", 1);
        let out = dir.path().to_str().unwrap();

        run_cli(&["protect", doc.to_str().unwrap(), "-p", "s3cret", "--no-print", "-o", out]).unwrap();
        let locked = dir.path().join("protected_doc.pdf");

        let locked_bytes = fs::read(&locked).unwrap();
        let err = document_info(&locked_bytes, None).unwrap_err();
        assert!(err.to_string().contains("--password"));
        let info = document_info(&locked_bytes, Some("s3cret")).unwrap();
        assert!(info.encrypted);
        assert_eq!(info.pages[0].width, 100.0);

        assert!(run_cli(&["unlock", locked.to_str().unwrap(), "-p", "wrong", "-o", out]).is_err());
        run_cli(&["unlock", locked.to_str().unwrap(), "-p", "s3cret", "-o", out]).unwrap();
        let unlocked = fs::read(dir.path().join("unlocked_protected_doc.pdf")).unwrap();
        assert!(!document_info(&unlocked, None).unwrap().encrypted);
    }

    #[test]
    fn test_sign_from_png_file() {
        let dir = TempDir::new().unwrap();
        let doc = write_pdf(&dir, "lease.pdf", 1);
        let sig = dir.path().join("sig.png");
        fs::write(&sig, png(20, 8)).unwrap();
        let out = dir.path().to_str().unwrap();

        run_cli(&[
            "sign",
            doc.to_str().unwrap(),
            "-s",
            sig.to_str().unwrap(),
            "--page",
            "1",
            "-x",
            "10",
            "-y",
            "10",
            "--width",
            "50",
            "-o",
            out,
        ])
        .unwrap();
        assert!(dir.path().join("signed_lease.pdf").exists());
    }

    #[test]
    fn test_run_json_command() {
        let dir = TempDir::new().unwrap();
        let command = PdfCommand::ImagesToPdf {
            images: vec![InputFile::new("a.png", png(30, 30))],
        };
        let json = dir.path().join("command.json");
        fs::write(&json, serde_json::to_string(&command).unwrap()).unwrap();
        let out = dir.path().join("out.pdf");

        run_cli(&["run", json.to_str().unwrap(), "-o", out.to_str().unwrap()]).unwrap();
        assert_eq!(get_page_count(&fs::read(&out).unwrap()).unwrap(), 1);
    }

    #[test]
    fn test_bad_config_file_is_reported() {
        let dir = TempDir::new().unwrap();
        let config = dir.path().join("bad.toml");
        fs::write(&config, "[raster]\nscale = 9.0\n").unwrap();
        let err = load_config(Some(&config)).unwrap_err();
        assert!(err.to_string().contains("Failed to load configuration"));
    }

    #[test]
    fn test_info_render() {
        let info = DocumentInfo {
            page_count: 2,
            encrypted: false,
            pages: vec![
                PageLine {
                    page: 1,
                    width: 612.0,
                    height: 792.0,
                    rotation: 0,
                },
                PageLine {
                    page: 2,
                    width: 842.0,
                    height: 595.0,
                    rotation: 90,
                },
            ],
        };
        assert_eq!(
            info.render("a.pdf"),
            "a.pdf: 2 page(s)\n  page 1: 612 x 792 pt\n  page 2: 842 x 595 pt, rotated 90\n"
        );
    }
}
