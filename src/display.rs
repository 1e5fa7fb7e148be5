use crate::extract::truncate_display;
use crate::queue::TaskEnvelope;
use crate::target::TargetKind;
use colored::*;

/// Colored terminal output for the CLI
pub struct DisplayManager {
    use_colors: bool,
    quiet_mode: bool,
}

impl DisplayManager {
    pub fn new() -> Self {
        Self::with_quiet(false)
    }

    pub fn with_quiet(quiet: bool) -> Self {
        let use_colors = std::env::var("NO_COLOR").is_err()
            && std::env::var("TERM").map_or(true, |term| term != "dumb");

        Self {
            use_colors,
            quiet_mode: quiet,
        }
    }

    pub fn print_section_header(&self, title: &str) {
        if self.quiet_mode {
            return;
        }

        if self.use_colors {
            println!("{}", title.bright_cyan().bold());
            println!("{}", "─".repeat(title.chars().count()).bright_cyan());
        } else {
            println!("{}", title);
            println!("{}", "=".repeat(title.len()));
        }
    }

    pub fn print_success(&self, message: &str) {
        if self.quiet_mode {
            return;
        }

        if self.use_colors {
            println!("  {} {}", "✓".bright_green().bold(), message.green());
        } else {
            println!("[✓] {}", message);
        }
    }

    pub fn print_warning(&self, message: &str) {
        if self.quiet_mode {
            return;
        }

        if self.use_colors {
            println!("  {} {}", "!".bright_yellow().bold(), message.yellow());
        } else {
            println!("[!] {}", message);
        }
    }

    /// Errors are printed even in quiet mode
    pub fn print_error(&self, message: &str) {
        if self.use_colors {
            eprintln!("  {} {}", "✗".bright_red().bold(), message.red().bold());
        } else {
            eprintln!("[✗] {}", message);
        }
    }

    pub fn print_info(&self, message: &str) {
        if self.quiet_mode {
            return;
        }

        if self.use_colors {
            println!("  {} {}", "i".bright_blue().bold(), message.blue());
        } else {
            println!("[i] {}", message);
        }
    }

    /// Print the sub-tasks a request fanned out into, in submission order
    pub fn print_task_list(&self, tasks: &[TaskEnvelope]) {
        if self.quiet_mode {
            return;
        }

        for (i, task) in tasks.iter().enumerate() {
            let payload = truncate_display(task.kwargs.clone());
            if self.use_colors {
                println!(
                    "  {} {} {}",
                    format!("{:>3}.", i + 1).bright_black(),
                    format!("{:<18}", task.kind).cyan().bold(),
                    payload.white()
                );
            } else {
                println!("  {:>3}. {:<18} {}", i + 1, task.kind, payload);
            }
        }
    }

    pub fn print_classified(&self, line: &str, kind: TargetKind) {
        if self.quiet_mode {
            return;
        }

        let label = format!("{:?}", kind);
        if self.use_colors {
            let label = match kind {
                TargetKind::Invalid => label.bright_red(),
                TargetKind::Domain => label.bright_yellow(),
                _ => label.bright_green(),
            };
            println!("  {:<14} {}", label, line.white());
        } else {
            println!("  {:<14} {}", label, line);
        }
    }

    pub fn print_banner(&self, title: &str, subtitle: Option<&str>) {
        if self.quiet_mode {
            return;
        }

        if self.use_colors {
            println!();
            println!("  {}", "┌─".bright_cyan().to_string() + &"─".repeat(title.len() + 2) + "─┐");
            println!("  {} {} {}", "│".bright_cyan(), title.bright_white().bold(), "│".bright_cyan());
            if let Some(sub) = subtitle {
                println!(
                    "  {} {} {}",
                    "│".bright_cyan(),
                    format!("{:^width$}", sub, width = title.len()).bright_black(),
                    "│".bright_cyan()
                );
            }
            println!("  {}", "└─".bright_cyan().to_string() + &"─".repeat(title.len() + 2) + "─┘");
            println!();
        } else {
            let border = "=".repeat(title.len() + 4);
            println!("\n{}", border);
            println!("  {}  ", title);
            if let Some(sub) = subtitle {
                println!("  {}  ", sub);
            }
            println!("{}\n", border);
        }
    }
}

impl Default for DisplayManager {
    fn default() -> Self {
        Self::new()
    }
}
