//! # formstamp CLI
//!
//! Usage:
//!   formstamp --layout layout.json --template bohrprotokoll.pdf record.json -o report.pdf
//!   cat record.json | formstamp --layout layout.json --templates ./templates
//!   formstamp --layout layout.json --templates ./templates --offsets tuning.json batch.json
//!
//! `--template` names the template file directly; otherwise the layout's
//! template name is looked up below `--templates` (default: the current
//! directory). A record file holding a JSON array renders every record into
//! one PDF.
//! Set `RUST_LOG=debug` for placement diagnostics.

use std::env;
use std::fs;
use std::io::{self, Read};
use std::process;

use formstamp::offsets::OffsetOverrides;
use formstamp::pdf::TemplatePdf;
use formstamp::{
    Assembler, DirTemplateStore, MemoryTemplateStore, OutputKind, RenderOutput, ReportRecord, StampError,
    TemplateStore,
};

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = env::args().collect();
    let flag = |name: &str| args.windows(2).find(|w| w[0] == name).map(|w| w[1].clone());

    let Some(layout_path) = flag("--layout") else {
        eprintln!("✗ Missing --layout <file>");
        eprintln!(
            "Usage: formstamp --layout layout.json (--template <file> | --templates <dir>) [--offsets offsets.json] [record.json] [-o output]"
        );
        process::exit(2);
    };
    let templates = Templates {
        file: flag("--template"),
        dir: flag("--templates").unwrap_or_else(|| ".".to_string()),
    };

    // The record is the first argument that is neither a flag nor a flag's value.
    let takes_value = ["--layout", "--template", "--templates", "--offsets", "-o"];
    let input_path = args
        .iter()
        .enumerate()
        .skip(1)
        .find(|(i, a)| !a.starts_with('-') && !takes_value.contains(&args[i - 1].as_str()))
        .map(|(_, a)| a.clone());

    match run(&layout_path, &templates, flag("--offsets"), input_path, flag("-o")) {
        Ok((output, path)) => {
            for warning in &output.warnings {
                eprintln!("⚠ {}", warning);
            }
            eprintln!("✓ Written {} bytes to {}", output.bytes.len(), path);
        }
        Err(e) => {
            eprintln!("✗ {}", e);
            process::exit(1);
        }
    }
}

/// Where templates come from.
struct Templates {
    file: Option<String>,
    dir: String,
}

impl Templates {
    fn store(&self, template_name: &str) -> Result<Box<dyn TemplateStore>, StampError> {
        match &self.file {
            Some(path) => Ok(Box::new(MemoryTemplateStore::new().with(template_name, fs::read(path)?))),
            None => Ok(Box::new(DirTemplateStore::new(&self.dir))),
        }
    }
}

fn run(
    layout_path: &str,
    templates: &Templates,
    offsets_path: Option<String>,
    input_path: Option<String>,
    output_path: Option<String>,
) -> Result<(RenderOutput, String), StampError> {
    let mut assembler = Assembler::from_json(&fs::read_to_string(layout_path)?)?;
    if let Some(path) = offsets_path {
        let overrides: OffsetOverrides =
            serde_json::from_str(&fs::read_to_string(path)?).map_err(|e| StampError::json("offsets", e))?;
        assembler = assembler.with_offsets(&overrides)?;
    }

    let input = match input_path {
        Some(path) => fs::read_to_string(path)?,
        None => {
            let mut buf = String::new();
            io::stdin().read_to_string(&mut buf)?;
            buf
        }
    };
    let input: serde_json::Value = serde_json::from_str(&input).map_err(|e| StampError::json("record", e))?;

    let store = templates.store(&assembler.layout().template)?;
    let output = if input.is_array() {
        let records: Vec<ReportRecord> = serde_json::from_value(input).map_err(|e| StampError::json("record", e))?;
        let layout = assembler.layout();
        if layout.output != OutputKind::Pdf {
            return Err(StampError::OutputMismatch {
                layout: layout.id(),
                expected: OutputKind::Pdf.as_str(),
                actual: layout.output.as_str(),
            });
        }
        let template = TemplatePdf::load(&layout.template, &store.load(&layout.template)?)?;
        assembler.render_pdf_batch(&template, &records)?
    } else {
        let record: ReportRecord = serde_json::from_value(input).map_err(|e| StampError::json("record", e))?;
        assembler.render(store.as_ref(), &record)?
    };

    let path = output_path.unwrap_or_else(|| format!("output.{}", output.kind.extension()));
    fs::write(&path, &output.bytes)?;
    Ok((output, path))
}
