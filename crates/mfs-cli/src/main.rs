#![forbid(unsafe_code)]

mod extract;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use extract::{CommandDecompressor, HostSink, UnpackOptions, unpack_archive, unpack_image};
use mfs::{Archive, ByteOrder, InodeNumber, InodeRef, MinixFs, OpenOptions, WalkOptions};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "minixfs", version, about = "Inspect and extract MINIX v1 images and archives")]
struct Cli {
    /// Log decoder progress at debug level. `RUST_LOG` takes precedence.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Clone)]
struct ImageArgs {
    /// Image was written by a little-endian host (PC).
    #[arg(long)]
    little_endian: bool,

    #[arg(long, default_value_t = 1024)]
    block_size: u32,

    /// Accept images whose geometry does not cross-check.
    #[arg(long)]
    skip_validation: bool,
}

impl ImageArgs {
    fn open_options(&self) -> OpenOptions {
        OpenOptions {
            block_size: self.block_size,
            byte_order: if self.little_endian {
                ByteOrder::Little
            } else {
                ByteOrder::Big
            },
            skip_validation: self.skip_validation,
        }
    }
}

#[derive(Args, Clone)]
struct WalkArgs {
    /// Include device nodes, fifos and symlinks.
    #[arg(long)]
    with_special: bool,

    /// Replace non-ASCII name bytes instead of skipping the entry.
    #[arg(long)]
    lossy_names: bool,
}

impl WalkArgs {
    fn walk_options(&self) -> WalkOptions {
        WalkOptions {
            include_special: self.with_special,
            lossy_names: self.lossy_names,
            ..WalkOptions::default()
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Dump the superblock and allocation counts, or a single inode.
    Inspect {
        image: PathBuf,
        #[command(flatten)]
        image_args: ImageArgs,
        /// Dump this inode instead of the superblock.
        #[arg(long)]
        inode: Option<u16>,
        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },
    /// List every node below the root directory.
    Ls {
        image: PathBuf,
        #[command(flatten)]
        image_args: ImageArgs,
        #[command(flatten)]
        walk_args: WalkArgs,
    },
    /// Extract one or more images into a host directory.
    Unpack {
        #[arg(required = true)]
        images: Vec<PathBuf>,
        #[command(flatten)]
        image_args: ImageArgs,
        #[command(flatten)]
        walk_args: WalkArgs,
        #[arg(short = 'o', long = "output-dir", default_value = "disk")]
        output: PathBuf,
        /// Keep `.a.Z` archives instead of expanding them.
        #[arg(short, long)]
        keep_archives: bool,
        /// Archives inside the images use big-endian headers.
        #[arg(long)]
        archive_big_endian: bool,
    },
    /// List and extract the members of an archive.
    Unar {
        archive: PathBuf,
        #[arg(short = 'o', long = "output-dir", default_value = ".")]
        output: PathBuf,
        /// Headers were written by a big-endian host.
        #[arg(long)]
        big_endian: bool,
    },
}

#[derive(Debug, Serialize)]
struct SuperblockOutput {
    block_size: u32,
    byte_order: ByteOrder,
    ninodes: u16,
    nzones: u16,
    imap_blocks: u16,
    zmap_blocks: u16,
    first_data_zone: u16,
    log_zone_size: u16,
    max_size: u32,
    magic: u16,
    clean: bool,
    allocated_inodes: u64,
    allocated_zones: u64,
}

#[derive(Debug, Serialize)]
struct InodeOutput {
    ino: u16,
    mode: u16,
    uid: u16,
    gid: u8,
    size: u32,
    time: u32,
    nlinks: u8,
    zones: Vec<u16>,
    indirect_zone: u16,
    double_indirect_zone: u16,
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    if let Err(error) = run(cli) {
        eprintln!("error: {error:#}");
        std::process::exit(1);
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Inspect {
            image,
            image_args,
            inode,
            json,
        } => {
            let fs = open_image(&image, &image_args)?;
            match inode {
                Some(ino) => inspect_inode(&fs, ino, json),
                None => inspect_superblock(&fs, json),
            }
        }
        Command::Ls {
            image,
            image_args,
            walk_args,
        } => {
            let fs = open_image(&image, &image_args)?;
            list(&fs, &walk_args.walk_options())
        }
        Command::Unpack {
            images,
            image_args,
            walk_args,
            output,
            keep_archives,
            archive_big_endian,
        } => {
            let options = UnpackOptions {
                keep_archives,
                archive_byte_order: if archive_big_endian {
                    ByteOrder::Big
                } else {
                    ByteOrder::Little
                },
                walk: walk_args.walk_options(),
            };
            unpack(&images, &image_args, &output, &options)
        }
        Command::Unar {
            archive,
            output,
            big_endian,
        } => {
            let order = if big_endian {
                ByteOrder::Big
            } else {
                ByteOrder::Little
            };
            unar(&archive, &output, order)
        }
    }
}

fn open_image(path: &Path, args: &ImageArgs) -> Result<MinixFs> {
    MinixFs::open_path(path, &args.open_options())
        .with_context(|| format!("failed to open MINIX image {}", path.display()))
}

fn print_json(value: &impl Serialize) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("serialize output")?
    );
    Ok(())
}

fn inspect_superblock(fs: &MinixFs, json: bool) -> Result<()> {
    let sb = fs.superblock();
    let output = SuperblockOutput {
        block_size: fs.block_size().get(),
        byte_order: fs.byte_order(),
        ninodes: sb.ninodes,
        nzones: sb.nzones,
        imap_blocks: sb.imap_blocks,
        zmap_blocks: sb.zmap_blocks,
        first_data_zone: sb.first_data_zone,
        log_zone_size: sb.log_zone_size,
        max_size: sb.max_size,
        magic: sb.magic,
        clean: sb.is_clean(),
        allocated_inodes: fs.inode_bitmap().context("read inode map")?.count_set(),
        allocated_zones: fs.zone_bitmap().context("read zone map")?.count_set(),
    };

    if json {
        return print_json(&output);
    }

    println!("----- Super Block -----");
    let rows: [(&str, String); 13] = [
        ("block_size", output.block_size.to_string()),
        ("byte_order", output.byte_order.to_string()),
        ("ninodes", output.ninodes.to_string()),
        ("nzones", output.nzones.to_string()),
        ("imap_blocks", output.imap_blocks.to_string()),
        ("zmap_blocks", output.zmap_blocks.to_string()),
        ("first_data_zone", output.first_data_zone.to_string()),
        ("log_zone_size", output.log_zone_size.to_string()),
        ("max_size", output.max_size.to_string()),
        ("magic", format!("{:#06x}", output.magic)),
        ("clean", output.clean.to_string()),
        ("allocated_inodes", output.allocated_inodes.to_string()),
        ("allocated_zones", output.allocated_zones.to_string()),
    ];
    for (key, value) in rows {
        println!("{key:<20} = {value}");
    }
    Ok(())
}

fn inspect_inode(fs: &MinixFs, ino: u16, json: bool) -> Result<()> {
    let inode = fs
        .read_inode(InodeNumber(ino))
        .with_context(|| format!("read inode {ino}"))?;
    let output = InodeOutput {
        ino,
        mode: inode.mode,
        uid: inode.uid,
        gid: inode.gid,
        size: inode.size,
        time: inode.time,
        nlinks: inode.nlinks,
        zones: inode.zones.iter().map(|z| z.0).collect(),
        indirect_zone: inode.indirect_zone.0,
        double_indirect_zone: inode.double_indirect_zone.0,
    };

    if json {
        return print_json(&output);
    }

    println!("----- Inode #{ino} -----");
    println!("{:<20} = {:05o}", "mode", output.mode);
    for (key, value) in [
        ("uid", output.uid.to_string()),
        ("gid", output.gid.to_string()),
        ("size", output.size.to_string()),
        ("time", output.time.to_string()),
        ("nlinks", output.nlinks.to_string()),
        ("zones", format!("{:?}", output.zones)),
        ("indirect_zone", output.indirect_zone.to_string()),
        ("double_indirect_zone", output.double_indirect_zone.to_string()),
    ] {
        println!("{key:<20} = {value}");
    }
    Ok(())
}

fn list(fs: &MinixFs, options: &WalkOptions) -> Result<()> {
    for entry in fs.walk(options) {
        match entry {
            Ok(entry) => {
                let node = InodeRef {
                    ino: entry.ino,
                    inode: entry.inode,
                };
                println!("{:<40} : {node}", entry.path);
            }
            Err(e) => tracing::warn!(error = %e, "skipping undecodable entry"),
        }
    }
    Ok(())
}

fn unpack(images: &[PathBuf], args: &ImageArgs, output: &Path, options: &UnpackOptions) -> Result<()> {
    let mut sink = HostSink::new(output)
        .with_context(|| format!("create output directory {}", output.display()))?;
    let decompressor = CommandDecompressor::default();
    for image in images {
        info!(image = %image.display(), "unpack image");
        let fs = open_image(image, args)?;
        let stats = unpack_image(&fs, options, &mut sink, &decompressor)?;
        info!(
            image = %image.display(),
            dirs = stats.dirs,
            files = stats.files,
            archives = stats.archives,
            skipped = stats.skipped,
            failed = stats.failed,
            "image done"
        );
    }
    Ok(())
}

fn unar(path: &Path, output: &Path, order: ByteOrder) -> Result<()> {
    let data = std::fs::read(path).with_context(|| format!("read archive {}", path.display()))?;
    let archive = Archive::with_byte_order(&data, order)
        .with_context(|| format!("open archive {}", path.display()))?;
    for entry in archive.walk() {
        match entry {
            Ok(entry) => println!("{:<20} {}", entry.name, entry.size),
            Err(e) => tracing::warn!(error = %e, "skipping archive member"),
        }
    }

    let mut sink = HostSink::new(output)
        .with_context(|| format!("create output directory {}", output.display()))?;
    let name = path
        .file_name()
        .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned());
    unpack_archive(&name, &data, Path::new(""), order, &mut sink)?;
    Ok(())
}
