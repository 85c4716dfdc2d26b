#![warn(clippy::pedantic)]
#![allow(
    clippy::cast_possible_truncation,
    clippy::missing_errors_doc,
    clippy::struct_excessive_bools,
)]
#![warn(rust_2018_idioms)]

use anyhow::{Context, Result as AResult};
use munbox::{macos::AppleDoubleWriter, process, Advance, FileInfo, FileLayer, ForkType};
use pico_args::Arguments;
use std::{
    env,
    fs::{self, File},
    io::Write,
    path::{Path, PathBuf},
    process::exit,
};

fn exit_usage(code: i32) -> ! {
    eprintln!(
        include_str!("munbox.usage"),
        env::args().next().unwrap_or_else(|| "munbox".to_string())
    );
    exit(code);
}

struct Options {
    output_dir: PathBuf,
    apple_double: bool,
    verbose: bool,
}

fn main() {
    let mut args = Arguments::from_env();
    if args.contains("--help") {
        exit_usage(0);
    }

    let options = Options {
        output_dir: match args.opt_value_from_str::<_, PathBuf>("--output-dir") {
            Ok(dir) => dir.unwrap_or_else(|| PathBuf::from(".")),
            Err(error) => {
                eprintln!("munbox: {}", error);
                exit_usage(2);
            }
        },
        apple_double: args.contains("--apple-double"),
        verbose: args.contains("--verbose"),
    };

    let files = match args.free() {
        Ok(files) => files,
        Err(error) => {
            eprintln!("munbox: {}", error);
            exit_usage(2);
        }
    };
    if files.is_empty() {
        eprintln!("munbox: no input files");
        exit_usage(2);
    }

    let mut failures = 0;
    for filename in &files {
        if let Err(error) = extract(filename, &options) {
            eprintln!("munbox: {:#}", error);
            failures += 1;
        }
    }
    exit(if failures > 0 { 1 } else { 0 });
}

fn extract(filename: &str, options: &Options) -> AResult<()> {
    let source = FileLayer::open(filename).with_context(|| format!("can't open {}", filename))?;
    let mut layer = process(Box::new(source)).with_context(|| filename.to_string())?;

    fs::create_dir_all(&options.output_dir)
        .with_context(|| format!("can't create {}", options.output_dir.display()))?;

    let mut advance = Advance::First;
    loop {
        let info = match layer.open(advance).with_context(|| filename.to_string())? {
            Some(info) => info,
            None => break,
        };
        advance = Advance::Next;

        let name = output_name(&info);
        match info.fork {
            ForkType::Data => {
                let path = options.output_dir.join(&name);
                write_data_fork(layer.as_mut(), &path)
                    .with_context(|| format!("can't write {}", path.display()))?;
                if options.verbose {
                    println!("{} ({} bytes)", path.display(), info.len);
                }
            }
            ForkType::Resource => {
                if options.apple_double {
                    let path = options.output_dir.join(format!("._{}", name));
                    write_resource_fork(layer.as_mut(), &path, &info)
                        .with_context(|| format!("can't write {}", path.display()))?;
                    if options.verbose {
                        println!("{} ({} bytes)", path.display(), info.len);
                    }
                } else if options.verbose {
                    println!("{}: skipping resource fork ({} bytes)", name, info.len);
                }
            }
        }
    }
    Ok(())
}

/// Archive entries keep their stored names; a bare stream falls back to
/// the source name with a suffix so the input is never clobbered.
fn output_name(info: &FileInfo) -> String {
    let name = if info.name.is_empty() {
        "untitled".to_string()
    } else {
        info.name.replace('/', "_").replace(':', "_")
    };
    if info.has_metadata {
        name
    } else {
        format!("{}.out", name)
    }
}

fn write_data_fork(layer: &mut dyn munbox::Layer, path: &Path) -> AResult<()> {
    let mut out = File::create(path)?;
    let mut chunk = [0; 4096];
    loop {
        let n = layer.read(&mut chunk)?;
        if n == 0 {
            break;
        }
        out.write_all(&chunk[..n])?;
    }
    Ok(())
}

fn write_resource_fork(
    layer: &mut dyn munbox::Layer,
    path: &Path,
    info: &FileInfo,
) -> AResult<()> {
    let mut data = Vec::with_capacity(info.len as usize);
    let mut chunk = [0; 4096];
    loop {
        let n = layer.read(&mut chunk)?;
        if n == 0 {
            break;
        }
        data.extend_from_slice(&chunk[..n]);
    }
    let mut writer = AppleDoubleWriter::create(path, info)?;
    writer.append_resource_fork(&data)?;
    Ok(())
}
