use loadfleet::error::AppResult;

fn main() -> AppResult<()> {
    loadfleet::run()
}
