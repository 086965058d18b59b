use colored::Colorize;

pub fn success(message: &str) {
    println!("{} {}", "✓".green(), message);
}

pub fn warning(message: &str) {
    println!("{} {}", "⚠".yellow(), message.yellow());
}

pub fn failure(message: &str) {
    eprintln!("{} {}", "✗".red(), message.red());
}

pub fn dry_run_steps(steps: &[String]) {
    println!("{}", "Dry run, nothing will be changed:".bold());
    for (i, step) in steps.iter().enumerate() {
        println!("  {}. {}", i + 1, step);
    }
}
