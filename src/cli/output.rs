use std::io::IsTerminal;

use ansi_term::Colour;

use crate::{
    engine::{CounterTally, Snapshot},
    hotkey::bindings::HotkeyBindings,
    storage::entities::CounterDefinition,
};

/// Parses `#RRGGBB`. Anything else renders without color.
pub fn parse_hex_color(color: &str) -> Option<(u8, u8, u8)> {
    let hex = color.strip_prefix('#')?;
    if hex.len() != 6 || !hex.is_ascii() {
        return None;
    }
    let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).ok();
    Some((channel(0)?, channel(2)?, channel(4)?))
}

fn paint(text: &str, color: &str, colored: bool) -> String {
    match parse_hex_color(color).filter(|_| colored) {
        Some((r, g, b)) => Colour::RGB(r, g, b).paint(text).to_string(),
        None => text.to_string(),
    }
}

/// `label  count  points per press  earned points`.
pub fn format_tally(tally: &CounterTally, colored: bool) -> String {
    format!(
        "{}\t{}\t{}\t{}",
        paint(&tally.definition.label, &tally.definition.color, colored),
        tally.count,
        tally.definition.points,
        tally.points()
    )
}

pub fn format_total(snapshot: &Snapshot) -> String {
    format!("Total\t{}\t{}", snapshot.total, snapshot.progress())
}

pub fn format_definition(
    definition: &CounterDefinition,
    hotkey: Option<&str>,
    colored: bool,
) -> String {
    format!(
        "{}\t{}\t{}\t{}\t{}{}",
        definition.key,
        paint(&definition.label, &definition.color, colored),
        definition.points,
        definition.color,
        hotkey.unwrap_or("-"),
        if definition.is_builtin() { "\tbuilt-in" } else { "" }
    )
}

fn colored_output() -> bool {
    std::io::stdout().is_terminal()
}

pub fn print_snapshot(snapshot: &Snapshot) {
    let colored = colored_output();
    for tally in &snapshot.counters {
        println!("{}", format_tally(tally, colored));
    }
    println!();
    println!("{}", format_total(snapshot));
}

pub fn print_counter(snapshot: &Snapshot, key: &str) {
    if let Some(tally) = snapshot.get(key) {
        println!("{}", format_tally(tally, colored_output()));
    }
    println!("{}", format_total(snapshot));
}

pub fn print_definitions(definitions: &[CounterDefinition], hotkeys: &HotkeyBindings) {
    let colored = colored_output();
    for definition in definitions {
        println!(
            "{}",
            format_definition(definition, hotkeys.get(&definition.key), colored)
        );
    }
}
