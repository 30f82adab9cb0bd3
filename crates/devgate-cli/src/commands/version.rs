use devgate_core::version::version_string;
use miette::Result;

pub fn run(json: bool) -> Result<()> {
    if json {
        println!(
            "{}",
            serde_json::json!({
                "name": "devgate",
                "version": devgate_core::VERSION,
            })
        );
    } else {
        println!("{}", version_string());
    }
    Ok(())
}
