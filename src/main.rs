use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use orgish::format::render_document;
use orgish::{NodeId, OrgDocument, OrgGrammar, parse_str};

#[derive(Debug, Parser)]
#[command(name = "orgish", about = "Org outline tooling built on the orgish crate", version)]
struct Cli {
    /// Enable verbose logging for debugging.
    #[arg(long, global = true)]
    verbose: bool,
    /// Restrict TODO recognition to these keywords (repeatable). Without
    /// it, any leading all-caps word counts.
    #[arg(long = "todo-keyword", global = true)]
    todo_keywords: Vec<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Parse org files and print their structure.
    Parse(ParseArgs),

    /// Re-serialize org files in canonical form.
    Format(FormatArgs),

    /// List every heading with its inherited tag set.
    Tags(TagsArgs),
}

#[derive(Debug, Args)]
struct ParseArgs {
    /// Org files or directories containing org files.
    #[arg(required = true)]
    inputs: Vec<PathBuf>,
    /// Emit JSON instead of a debug representation.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Args)]
struct FormatArgs {
    /// Org files or directories containing org files.
    #[arg(required = true)]
    inputs: Vec<PathBuf>,
    /// Rewrite the files instead of printing to stdout.
    #[arg(long)]
    in_place: bool,
}

#[derive(Debug, Args)]
struct TagsArgs {
    /// Org files or directories containing org files.
    #[arg(required = true)]
    inputs: Vec<PathBuf>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let grammar = build_grammar(&cli.todo_keywords);
    match &cli.command {
        Commands::Parse(args) => handle_parse(args, &grammar, cli.verbose),
        Commands::Format(args) => handle_format(args, &grammar, cli.verbose),
        Commands::Tags(args) => handle_tags(args, &grammar, cli.verbose),
    }
}

fn build_grammar(todo_keywords: &[String]) -> OrgGrammar {
    if todo_keywords.is_empty() {
        OrgGrammar::new()
    } else {
        OrgGrammar::new().with_todo_keywords(todo_keywords.iter().cloned())
    }
}

fn handle_parse(args: &ParseArgs, grammar: &OrgGrammar, verbose: bool) -> Result<()> {
    for path in expand_inputs(&args.inputs)? {
        if verbose {
            eprintln!("parsing {:?}", path);
        }
        let doc = load_document(&path, grammar)?;
        if args.json {
            let json = serde_json::to_string_pretty(&doc)
                .with_context(|| format!("serializing {:?}", path))?;
            println!("{json}");
        } else {
            println!("{doc:#?}");
        }
    }
    Ok(())
}

fn handle_format(args: &FormatArgs, grammar: &OrgGrammar, verbose: bool) -> Result<()> {
    for path in expand_inputs(&args.inputs)? {
        if verbose {
            eprintln!("formatting {:?}", path);
        }
        let doc = load_document(&path, grammar)?;
        let rendered = render_document(&doc);
        if args.in_place {
            fs::write(&path, rendered).with_context(|| format!("writing {:?}", path))?;
        } else {
            print!("{rendered}");
        }
    }
    Ok(())
}

fn handle_tags(args: &TagsArgs, grammar: &OrgGrammar, verbose: bool) -> Result<()> {
    for path in expand_inputs(&args.inputs)? {
        if verbose {
            eprintln!("scanning {:?}", path);
        }
        let doc = load_document(&path, grammar)?;
        for line in tag_report(&doc) {
            println!("{line}");
        }
    }
    Ok(())
}

fn load_document(path: &Path, grammar: &OrgGrammar) -> Result<OrgDocument> {
    let text = fs::read_to_string(path).with_context(|| format!("reading {:?}", path))?;
    parse_str(grammar, &text).with_context(|| format!("parsing {:?}", path))
}

/// One line per heading: the title path from the root, then the
/// inherited tag set.
fn tag_report(doc: &OrgDocument) -> Vec<String> {
    let mut out = Vec::new();
    collect_tag_lines(doc, OrgDocument::ROOT, &mut Vec::new(), &mut out);
    out
}

fn collect_tag_lines(
    doc: &OrgDocument,
    id: NodeId,
    trail: &mut Vec<String>,
    out: &mut Vec<String>,
) {
    let node = doc.node(id);
    if node.level > 0 {
        trail.push(node.title().to_string());
        let mut line = trail.join(" / ");
        let tags = doc.all_tags(id);
        if !tags.is_empty() {
            line.push_str(" :");
            for tag in &tags {
                line.push_str(tag);
                line.push(':');
            }
        }
        out.push(line);
    }
    for &child in node.children() {
        collect_tag_lines(doc, child, trail, out);
    }
    if node.level > 0 {
        trail.pop();
    }
}

fn expand_inputs(inputs: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for input in inputs {
        if input.is_dir() {
            collect_org_files(input, &mut files)
                .with_context(|| format!("listing {:?}", input))?;
        } else {
            files.push(input.clone());
        }
    }
    files.sort();
    files.dedup();
    Ok(files)
}

fn collect_org_files(dir: &Path, files: &mut Vec<PathBuf>) -> Result<()> {
    for entry in fs::read_dir(dir).with_context(|| format!("reading directory {:?}", dir))? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            collect_org_files(&path, files)?;
        } else if path.extension().map(|ext| ext == "org").unwrap_or(false) {
            files.push(path);
        }
    }
    Ok(())
}
