use meshpeer::Config;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    println!("meshpeer configuration check");
    println!("============================\n");

    println!("Search paths (in priority order, lowest to highest):");
    for path in Config::search_paths() {
        let status = if path.exists() { "[found]" } else { "[not found]" };
        println!("  {} {}", status, path.display());
    }
    println!();

    let (config, loaded_paths) = match Config::load() {
        Ok(result) => result,
        Err(e) => {
            eprintln!("Error loading config: {}", e);
            std::process::exit(1);
        }
    };

    if loaded_paths.is_empty() {
        println!("No config files found, using defaults.");
    } else {
        println!("Loaded {} config file(s):", loaded_paths.len());
        for path in &loaded_paths {
            println!("  - {}", path.display());
        }
    }

    println!();
    match &config.interface.local_addr {
        Some(addr) => println!("interface.local_addr: {}", addr),
        None => println!("interface.local_addr: (not configured)"),
    }
    match &config.interface.mesh_addr {
        Some(addr) => println!("interface.mesh_addr:  {}", addr),
        None => println!("interface.mesh_addr:  (same as local)"),
    }
    println!(
        "peering: retry={}us confirm={}us holding={}us max_retries={}",
        config.peering.retry_timeout_us,
        config.peering.confirm_timeout_us,
        config.peering.holding_timeout_us,
        config.peering.max_retries
    );
    println!(
        "peering: beacon_window={} max_beacon_loss={} tolerance={}ms",
        config.peering.beacon_window,
        config.peering.max_beacon_loss,
        config.peering.beacon_interval_tolerance_ms
    );
    println!(
        "metric:  test_frame_len={} failure_source={:?} sqrt_time={}",
        config.metric.test_frame_len, config.metric.failure_source, config.metric.sqrt_time
    );

    println!("\nEffective configuration:");
    match config.to_yaml() {
        Ok(yaml) => println!("{}", yaml),
        Err(e) => {
            eprintln!("Error rendering config: {}", e);
            std::process::exit(1);
        }
    }
}
