#![allow(warnings)]
use std::str::FromStr;

use crate::deps::{
    log::{debug, info},
    objgrind::{
        paint::paint,
        reporter::{ErrorReporter, Reporter, ThreadId},
        request,
        tag::{PaintTag, Tag},
        tagstore::TagStore,
    },
    structopt::StructOpt,
};

pub mod deps {
    pub(crate) use env_logger;
    pub(crate) use log;
    pub(crate) use structopt;

    pub(crate) use objgrind;
}


mod cli {
    pub fn parse_hex(number: &str) -> Result<usize, Box<dyn std::error::Error>> {
        let trimmed = number.trim_start_matches("0x");
        Ok(usize::from_str_radix(trimmed, 16)?)
    }
}

macro_rules! panic_on_err {
    () => {
        |err| panic!("[ERROR] {}:{}: {}", module_path!(), line!(), err)
    };
}


#[derive(Copy, Clone, Debug, PartialEq)]
enum PaintTagArg {
    NoCheck,
    Unwritable,
    Unreferable,
}

impl From<PaintTagArg> for PaintTag {
    fn from(value: PaintTagArg) -> Self {
        match value {
            PaintTagArg::NoCheck => PaintTag::NoCheck,
            PaintTagArg::Unwritable => PaintTag::Unwritable,
            PaintTagArg::Unreferable => PaintTag::Unreferable,
        }
    }
}

impl FromStr for PaintTagArg {
    type Err = crate::deps::objgrind::error::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "nocheck" => Ok(PaintTagArg::NoCheck),
            "unwritable" => Ok(PaintTagArg::Unwritable),
            "unreferable" => Ok(PaintTagArg::Unreferable),
            bad_value => Err(crate::deps::objgrind::error::Error::Parse {
                value:    bad_value.to_string(),
                typename: std::any::type_name::<PaintTagArg>(),
                reason:   "value was not one of: nocheck, unwritable, unreferable".to_string(),
            }),
        }
    }
}


#[derive(Debug, StructOpt)]
#[structopt(name = "objgrind", about = "access-discipline shadow memory checker")]
struct Args {
    #[structopt(short, long)]
    debug: bool,

    #[structopt(short, long)]
    verbose: bool,

    #[structopt(long)]
    xml: bool,

    #[structopt(subcommand)]
    cmd: Command,
}


#[derive(Clone, Debug, StructOpt, PartialEq)]
enum Command {
    Paint(Paint),
    Check(Check),
    Demo(Demo),
}


/// Paint a range of addresses with a tag, the same operation a
/// `MAKE_NOCHECK`/`MAKE_UNWRITABLE`/`MAKE_UNREFERABLE` client request
/// performs, and print the tag read back at the start and end of the
/// range.
#[derive(Clone, Debug, StructOpt, PartialEq)]
struct Paint {
    #[structopt(long, parse(try_from_str = cli::parse_hex))]
    addr: usize,

    #[structopt(long)]
    len: usize,

    #[structopt(long)]
    tag: PaintTagArg,
}


/// Report the tag at a single address, and whether a store to it would be
/// flagged unwritable (`CHECK_UNWRITABLE`).
#[derive(Clone, Debug, StructOpt, PartialEq)]
struct Check {
    #[structopt(long, parse(try_from_str = cli::parse_hex))]
    addr: usize,
}


/// Run a short scripted scenario exercising the painter, the checker, and
/// the reference-check discipline together, printing each violation the
/// reporter records.
#[derive(Clone, Debug, StructOpt, PartialEq)]
struct Demo {
    #[structopt(long, default_value = "0x10000", parse(try_from_str = cli::parse_hex))]
    base: usize,
}


fn paint_command(store: &mut TagStore, cmd: &Paint) {
    let end = crate::deps::objgrind::error::checked_range_end(cmd.addr, cmd.len)
        .unwrap_or_else(panic_on_err!());
    paint(store, cmd.addr, cmd.len, cmd.tag.into());
    println!(
        "painted [{:#x}, {:#x}) as {}",
        cmd.addr,
        end,
        PaintTag::from(cmd.tag).mnemonic()
    );
    println!("tag at start: {:?}", store.get_tag(cmd.addr));
    if cmd.len > 0 {
        println!("tag at end-1: {:?}", store.get_tag(end - 1));
    }
}

fn check_command(store: &mut TagStore, cmd: &Check) {
    let tag = store.get_tag(cmd.addr);
    let unwritable = request::dispatch(store, request::ClientRequest::CheckUnwritable { addr: cmd.addr });
    println!("tag at {:#x}: {:?} (unwritable={})", cmd.addr, tag, unwritable != 0);
}

/// Walk through the two canonical scenarios this tool exists to catch: a
/// store into memory that has been marked unwritable, and a pointer field
/// that ends up referencing memory marked unreferable.
fn demo_command(store: &mut TagStore, reporter: &mut Reporter, cmd: &Demo) {
    use objgrind::checker::{store_check32, store_check64, WordWidth};

    let unwritable_addr = cmd.base;
    let field_addr = cmd.base + 0x1000;
    let pointee_addr = cmd.base + 0x2000;

    println!("-- scenario 1: store into unwritable memory --");
    paint(store, unwritable_addr, 64, PaintTag::Unwritable);
    store_check32(store, reporter, ThreadId::from(0), unwritable_addr, 0xdead_beef);

    println!("-- scenario 2: refcheck field pointing at unreferable memory --");
    store.set_tag(field_addr, Tag::RefCheck);
    paint(store, pointee_addr, 64, PaintTag::Unreferable);
    store_check64(
        store,
        reporter,
        ThreadId::from(0),
        field_addr,
        pointee_addr as u64,
        WordWidth::W64,
    );

    if reporter.errors().is_empty() {
        println!("no violations recorded");
    }
    for error in reporter.errors() {
        println!("{}", reporter.pretty_print(error, false));
    }
}


fn main() {
    let args = Args::from_args();
    if args.debug {
        crate::deps::env_logger::builder()
            .filter_level(crate::deps::log::LevelFilter::Debug)
            .init();
    } else {
        crate::deps::env_logger::builder()
            .filter_level(crate::deps::log::LevelFilter::Warn)
            .init();
    }

    debug!("program arguments: {:#?}", args);

    let mut store = TagStore::new();
    store.set_verbose(args.verbose);
    store.set_xml(args.xml);
    let mut reporter = Reporter::new();

    match &args.cmd {
        Command::Paint(cmd) => paint_command(&mut store, cmd),
        Command::Check(cmd) => check_command(&mut store, cmd),
        Command::Demo(cmd) => demo_command(&mut store, &mut reporter, cmd),
    }
}
