use super::or_exit;

pub fn run(host: &str, port: u16, reject: bool) {
    let base = format!("http://{host}:{port}");

    println!("GeoCellTrack sink v{}", geocell_core::VERSION);
    println!("   {base}");
    if reject {
        println!("   Reject mode: every push answers 503");
    }
    println!();
    println!("   Endpoints:");
    println!("     GET  /                        API index");
    println!("     GET  /health                  Health check");
    println!("     POST /{{root}}/{{agent}}.json     Append one sample");
    println!("     GET  /{{root}}/{{agent}}.json     List an agent's samples");
    println!();
    println!("   Examples:");
    println!("     geocell run --agent-id agent-1 --sink-url {base}");
    println!("     curl {base}/geocelltrack/tracker/agent-1.json");
    println!();

    let rt = super::runtime();
    or_exit(
        rt.block_on(geocell_sink::run_server(host, port, reject)),
        "Sink failed",
    );
}
