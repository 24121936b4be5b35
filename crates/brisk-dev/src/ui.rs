use colored::*;
use std::time::Duration;

/// Terminal status lines for the dev server
pub struct UI;

impl UI {
    pub fn error(message: &str) {
        eprintln!("{} {} {}", Self::timestamp().bright_black(), "✗".red(), message.red());
    }

    pub fn warning(message: &str) {
        println!("{} {} {}", Self::timestamp().bright_black(), "⚠".yellow(), message.yellow());
    }

    pub fn file_changed(path: &str) {
        println!(
            "{} {} {} {}",
            Self::timestamp().bright_black(),
            "📝".bright_yellow(),
            "File changed:".bright_white(),
            path.bright_cyan()
        );
    }

    pub fn rebuilt(modules: usize, rendered: usize, duration: Duration) {
        println!(
            "{} {} {} {}",
            Self::timestamp().bright_black(),
            "✓".green(),
            format!("Rebuilt {} modules ({} chunks rendered)", modules, rendered).bright_white(),
            format!("in {}ms", duration.as_millis()).bright_black()
        );
    }

    pub fn hmr_update(modules: &[String]) {
        println!(
            "{} {} {} {}",
            Self::timestamp().bright_black(),
            "🔥".bright_magenta(),
            "hmr update".bright_white(),
            modules.join(", ").bright_cyan()
        );
    }

    pub fn full_reload(reason: &str) {
        println!(
            "{} {} {} {}",
            Self::timestamp().bright_black(),
            "🔄".bright_magenta(),
            "page reload".bright_white(),
            reason.bright_black()
        );
    }

    pub fn server_start(url: &str, watching: &str) {
        println!("\n{}", "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━".bright_black());
        println!("{} {}", "⚡".bright_cyan(), "brisk dev server".bright_white().bold());
        println!("{} {}", "   Local:".bright_black(), url.bright_cyan().underline());
        println!("{} {}", "   Watching:".bright_black(), watching.bright_white());
        println!("{} {}", "   Press".bright_black(), "Ctrl+C".bright_red().bold());
        println!("{}", "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━".bright_black());
        println!();
    }

    pub fn server_stop() {
        println!("\n{} {}", "🛑".bright_red(), "Stopping dev server".bright_white().bold());
    }

    fn timestamp() -> String {
        chrono::Local::now().format("%H:%M:%S").to_string()
    }
}
