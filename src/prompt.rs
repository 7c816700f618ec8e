use std::io::{self, BufRead, Write};

/// Ask the user to confirm an expensive sweep on stdin. Anything other than
/// "y"/"yes" declines.
pub fn confirm_expensive_operation(message: &str, cost: &str) -> bool {
    println!("\nCOST WARNING");
    println!("{message}");
    println!("Estimated cost: {cost}");
    print!("\nDo you want to proceed? (yes/no): ");
    let _ = io::stdout().flush();

    let mut response = String::new();
    if io::stdin().lock().read_line(&mut response).is_err() {
        return false;
    }
    let response = response.trim().to_lowercase();
    response == "yes" || response == "y"
}

pub fn show_cost_estimate(message: &str, cost: &str) {
    println!("\nCost estimate: {cost}");
    println!("{message}");
}
