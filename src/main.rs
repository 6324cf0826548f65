fn main() {
    if let Err(e) = devlink_lib::run() {
        eprintln!("devlink: {e}");
        std::process::exit(1);
    }
}
