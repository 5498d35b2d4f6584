//! Interactive reading over stdin.
//!
//! A simple line-oriented protocol:
//! - A choice label (`A`, `b`, ...) follows that choice
//! - Lines starting with `#` are commands (path, help, quit)

use anyhow::Result;
use std::io::{self, BufRead, Write};
use story_core::{Step, StoryReader};

const HELP: &str = "\
  <label>  - Follow a choice (A, B, C)
  #path    - Show the segments visited so far
  #help    - Show this help
  #quit    - Stop reading";

/// Read a story until it ends or the user quits, then log the session.
pub async fn run(mut reader: StoryReader) -> Result<()> {
    let record = reader.record();
    println!("=== {} ===", record.title);
    println!("Location: {}", record.location);
    if record.origin().is_fallback() {
        println!("(This is a {} story.)", record.origin());
    }
    for insight in reader.document().cultural_insights() {
        println!("  * {insight}");
    }
    println!();
    show_segment(&reader);

    if !reader.is_finished() {
        read_choices(&mut reader);
    }

    let chapters = reader.state().chapter();
    let interaction = reader.finish().await?;
    println!(
        "Read {chapters} chapter(s), {} choice(s) made.",
        interaction.choices_made.len()
    );
    Ok(())
}

/// Follow choices from stdin until the story ends, input closes or the
/// user quits.
fn read_choices(reader: &mut StoryReader) {
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(l) => l,
            Err(e) => {
                eprintln!("Error reading input: {e}");
                break;
            }
        };

        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(command) = line.strip_prefix('#') {
            match command.trim() {
                "quit" | "exit" => break,
                "path" => {
                    let path: Vec<String> =
                        reader.state().path().iter().map(|id| id.to_string()).collect();
                    println!("[PATH] {}", path.join(" -> "));
                }
                "help" => println!("[HELP]\n{HELP}"),
                _ => println!("[ERROR] Unknown command. Type #help for help."),
            }
            stdout.flush().ok();
            continue;
        }

        match reader.choose(line) {
            Step::Moved(_) => {
                println!();
                show_segment(reader);
                if reader.is_finished() {
                    break;
                }
            }
            Step::Dangling(_) => {
                println!("[ERROR] That path is not written yet. Pick another choice.");
            }
            Step::NoSuchChoice => {
                println!("[ERROR] No choice '{line}' here. Type #help for help.");
            }
        }
        stdout.flush().ok();
    }
}

fn show_segment(reader: &StoryReader) {
    let Some(segment) = reader.current_segment() else {
        return;
    };
    println!("[CHAPTER {}]", reader.state().chapter());
    println!("{}", segment.text);
    println!("(image: {})", segment.image);
    if segment.is_terminal() {
        println!();
        println!("The End.");
        return;
    }
    for choice in &segment.choices {
        println!("  {}. {}", choice.id, choice.text);
    }
}
