//! Interactive explorer for the debug and symbol information of a program
//! image. The itemized record text comes from `readelf`; everything else
//! is the symdb library.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Parser;

use symdb::{
    ArrayElements, AttrKind, AttrValue, BestMatch, DebugInfoForest, ObjectId,
    SectionDataSource, SectionStore, SymbolTable, Tag,
};

#[derive(Debug, Parser)]
/// Explore the debug and symbol information of a program image.
struct Symsh {
    /// Program image to read (via readelf).
    filename: PathBuf,
    /// Names to describe. With none given, enter the interactive shell.
    names: Vec<String>,
}

fn main() -> Result<()> {
    let args = Symsh::parse();

    println!("Reading the debug and symbol information; this might take some time");
    let world = World::load(&args.filename)?;
    println!(
        "Loaded; {} compile units, {} symbols, {} sections.",
        world.forest.roots().len(),
        world.symbols.len(),
        world.sections.sections().len(),
    );

    if !args.names.is_empty() {
        for name in &args.names {
            cmd_var(&world, name);
        }
        return Ok(());
    }

    println!("To quit: ^D or exit");
    let mut rl = rustyline::DefaultEditor::new()?;
    let prompt = ansi_term::Colour::Green.paint(">> ").to_string();
    'lineloop: loop {
        match rl.readline(&prompt) {
            Ok(line) => {
                let line = line.trim();
                let (cmd, rest) =
                    line.split_once(char::is_whitespace).unwrap_or((line, ""));
                if line.is_empty() {
                    continue 'lineloop;
                }

                let _ = rl.add_history_entry(line);

                match cmd {
                    "exit" => break,
                    "help" => {
                        println!("commands:");
                        for (name, _, desc) in COMMANDS {
                            println!("{:8} {}", name, desc);
                        }
                    }
                    _ => {
                        for (name, imp, _) in COMMANDS {
                            if *name == cmd {
                                imp(&world, rest);
                                continue 'lineloop;
                            }
                        }
                        println!("unknown command: {}", cmd);
                        println!("for help, try: help");
                    }
                }
            }
            Err(rustyline::error::ReadlineError::Interrupted) => {
                println!("^C");
                continue;
            }
            Err(rustyline::error::ReadlineError::Eof) => break,
            Err(e) => {
                println!("{:?}", e);
                break;
            }
        }
    }

    Ok(())
}

/// The three structures, built once at startup.
struct World {
    forest: DebugInfoForest,
    symbols: SymbolTable,
    sections: SectionStore,
}

impl World {
    fn load(path: &Path) -> Result<Self> {
        let header = readelf(path, &["-h"])?;
        let image = symdb::parse_image_info(&header)?;

        let info = readelf(path, &["-wi"])?;
        let forest = DebugInfoForest::build(symdb::info_records(
            info.lines().filter(|l| l.contains("DW_")),
        ))?;

        let symtab = readelf(path, &["-sW"])?;
        let symbols = SymbolTable::from_records(symdb::symbol_records(symtab.lines()));

        let sects = readelf(path, &["-SW"])?;
        let sections = SectionStore::new(
            symdb::section_records(sects.lines()),
            image.little_endian,
            Box::new(ReadelfDumps {
                path: path.to_owned(),
            }),
        );

        Ok(Self {
            forest,
            symbols,
            sections,
        })
    }
}

fn readelf(path: &Path, args: &[&str]) -> Result<String> {
    let out = std::process::Command::new("readelf")
        .args(args)
        .arg(path)
        .output()
        .context("running readelf")?;
    if !out.status.success() {
        bail!("readelf {} {} failed", args.join(" "), path.display());
    }
    Ok(String::from_utf8_lossy(&out.stdout).into_owned())
}

/// Section contents on demand, one `readelf -x` per section.
struct ReadelfDumps {
    path: PathBuf,
}

impl SectionDataSource for ReadelfDumps {
    fn section_dump(&self, name: &str) -> std::io::Result<String> {
        let out = std::process::Command::new("readelf")
            .arg("-x")
            .arg(name)
            .arg(&self.path)
            .output()?;
        Ok(String::from_utf8_lossy(&out.stdout).into_owned())
    }
}

type Command = fn(&World, &str);

static COMMANDS: &[(&str, Command, &str)] = &[
    ("var", cmd_var, "describe a name and its declared type chain"),
    ("value", cmd_value, "read the value stored for a variable"),
    ("svalue", cmd_svalue, "read the value stored for a variable, signed"),
    ("sym", cmd_sym, "show the symbol-table entry for a name"),
    ("addr", cmd_addr, "resolve an address: addr ADDR [PREFIX]"),
    ("elem", cmd_elem, "resolve an array element: elem ADDR SIZE [PREFIX]"),
    ("string", cmd_string, "read a NUL-terminated string: string ADDR [MAX]"),
    ("units", cmd_units, "list compile units"),
];

/// Follows the type-reference chain from a declaration to the last node
/// it can resolve, for display purposes.
fn ultimate_type(forest: &DebugInfoForest, id: ObjectId) -> Option<ObjectId> {
    let scope = forest.node(id).parent()?;
    let mut seen = BTreeSet::new();
    let mut current = id;
    loop {
        if !seen.insert(current) {
            break;
        }
        match forest.node(current).attr(&AttrKind::Type) {
            Some(&AttrValue::Ref(r)) => match forest.child_by_ref(scope, r) {
                Some(next) => current = next,
                None => break,
            },
            _ => break,
        }
    }
    Some(current)
}

fn cmd_var(world: &World, args: &str) {
    let bold = ansi_term::Style::new().bold();
    let name = args.trim();
    if name.is_empty() {
        println!("usage: var NAME");
        return;
    }
    let Some(id) = world.forest.find_definition(name) else {
        println!("{}", ansi_term::Colour::Red.paint("not found"));
        return;
    };
    let node = world.forest.node(id);
    println!("{}: {}", bold.paint(name), node.tag.stripped());

    if node.tag == Tag::Variable {
        if let Some(addr) = node.address() {
            println!(".. at address {:#x}", addr);
        }
        match world.symbols.symbol_by_name(name) {
            Some(sym) => println!(
                ".. symbol: address = {:#x}, size = {:#x}",
                sym.address, sym.size
            ),
            None => println!(".. no symbol-table entry"),
        }
    }

    let Some(unit) = world.forest.node(id).parent() else {
        println!(".. no enclosing compile unit");
        return;
    };
    println!(".. found in {}", world.forest.node(unit).basename);

    // Spell out the declared type, one chain step per word group.
    let mut words: Vec<String> = Vec::new();
    let mut seen = BTreeSet::new();
    let mut current = id;
    while seen.insert(current) {
        let Some(&AttrValue::Ref(r)) =
            world.forest.node(current).attr(&AttrKind::Type)
        else {
            break;
        };
        let Some(next) = world.forest.child_by_ref(unit, r) else {
            words.push("<unresolved>".to_string());
            break;
        };
        current = next;
        let step = world.forest.node(current);
        match &step.tag {
            Tag::ConstType => words.push("const".to_string()),
            Tag::VolatileType => words.push("volatile".to_string()),
            Tag::PointerType => words.push("pointer to".to_string()),
            Tag::StructureType => {
                words.push(format!("struct {}", step.name));
            }
            Tag::UnionType => words.push(format!("union {}", step.name)),
            Tag::EnumerationType => {
                words.push(format!("enum {}", step.name));
            }
            Tag::BaseType => words.push(step.name.clone()),
            Tag::ArrayType => match world.forest.element_count(current) {
                Some(n) => words.push(format!("[{}] of", n)),
                None => words.push("[] of".to_string()),
            },
            Tag::Typedef => {
                words.push(step.name.clone());
                if node.tag == Tag::Variable {
                    // The variable's declared type is now known.
                    break;
                }
            }
            other => words.push(format!("{} {}", other.stripped(), step.name)),
        }
    }
    if !words.is_empty() {
        println!(".. {}", words.join(" "));
    }
}

fn cmd_value(world: &World, args: &str) {
    read_value(world, args.trim(), false);
}

fn cmd_svalue(world: &World, args: &str) {
    read_value(world, args.trim(), true);
}

fn read_value(world: &World, name: &str, signed: bool) {
    if name.is_empty() {
        println!("usage: value NAME");
        return;
    }

    // An array dimension takes precedence over what the elements are.
    if let Some(id) = world.forest.find_definition(name) {
        match world.forest.array_element_count(id) {
            Some(ArrayElements::Count(n)) => {
                println!("{} is an array of {} elements", name, n);
                return;
            }
            Some(ArrayElements::UnknownCount) => {
                println!("{} is an array of unknown size", name);
                return;
            }
            _ => {}
        }
    }

    if signed {
        match world.symbols.read_signed_variable_value(name, &world.sections) {
            Ok(Some(v)) => println!("{} = {}", name, v),
            Ok(None) => println!("no stored value for {}", name),
            Err(e) => println!("error: {}", e),
        }
        return;
    }

    match world.symbols.read_variable_value(name, &world.sections) {
        Ok(Some(v)) => {
            print!("{} = {:#x} ({})", name, v, v);
            // Enum-typed variables get their value named.
            if let Some(id) = world.forest.find_definition(name) {
                if world.forest.is_enum(id) == Some(true) {
                    if let Some(e) = ultimate_type(&world.forest, id) {
                        if let Some(label) =
                            world.forest.enumerator_name(e, v as i64)
                        {
                            print!(" = {}", label);
                        }
                    }
                }
            }
            println!();
        }
        Ok(None) => println!("no stored value for {}", name),
        Err(e) => println!("error: {}", e),
    }
}

fn cmd_sym(world: &World, args: &str) {
    let name = args.trim();
    let Some(sym) = world.symbols.symbol_by_name(name) else {
        println!("{}", ansi_term::Colour::Red.paint("not found"));
        return;
    };
    println!(
        "{}: address = {:#x}, size = {:#x}, {} {} {} in section {}",
        name,
        sym.address,
        sym.size,
        sym.kind,
        sym.binding,
        sym.visibility,
        sym.section_index
    );
}

fn cmd_addr(world: &World, args: &str) {
    let mut parts = args.split_whitespace();
    let Some(addr) = parts.next().and_then(|s| parse_int::parse::<u64>(s).ok())
    else {
        println!("usage: addr ADDR [PREFIX]");
        return;
    };
    let prefix = parts.next().unwrap_or("");
    match world.symbols.best_match(addr, prefix) {
        BestMatch::Null => println!("NULL"),
        BestMatch::NotFound => {
            println!("{}", ansi_term::Colour::Red.paint("no symbol at or below that address"))
        }
        BestMatch::Symbol(sym) => {
            let name = sym.name.as_deref().unwrap_or("?");
            if sym.address == addr {
                println!("{}", name);
            } else {
                println!("{} + {:#x}", name, addr - sym.address);
            }
        }
    }
}

fn cmd_elem(world: &World, args: &str) {
    let mut parts = args.split_whitespace();
    let addr = parts.next().and_then(|s| parse_int::parse::<u64>(s).ok());
    let size = parts.next().and_then(|s| parse_int::parse::<u64>(s).ok());
    let (Some(addr), Some(size)) = (addr, size) else {
        println!("usage: elem ADDR SIZE [PREFIX]");
        return;
    };
    let prefix = parts.next().unwrap_or("");
    match world.symbols.array_reference(addr, prefix, size) {
        Some(r) if r.exact => println!("{}[{}]", r.name, r.index),
        Some(r) => println!("{}[{}] (inexact)", r.name, r.index),
        None => println!("{}", ansi_term::Colour::Red.paint("not found")),
    }
}

fn cmd_string(world: &World, args: &str) {
    let mut parts = args.split_whitespace();
    let Some(addr) = parts.next().and_then(|s| parse_int::parse::<u64>(s).ok())
    else {
        println!("usage: string ADDR [MAX]");
        return;
    };
    let max = parts
        .next()
        .and_then(|s| parse_int::parse::<usize>(s).ok())
        .unwrap_or(80);
    match world.sections.load_string(addr, max) {
        Ok(Some(s)) => println!("{:?}", s),
        Ok(None) => println!("no data at {:#x}", addr),
        Err(e) => println!("error: {}", e),
    }
}

fn cmd_units(world: &World, _args: &str) {
    for &root in world.forest.roots() {
        let unit = world.forest.node(root);
        println!("{:24} {}", unit.basename, unit.name);
    }
}
