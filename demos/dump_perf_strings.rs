use log::info;
use pmu_metrics::perf::PerfTool;
use pmu_metrics::pmu::EventCatalog;

fn main() -> pmu_metrics::Result<()> {
    env_logger::init();

    // Get path to the event list
    let prg_args = std::env::args().skip(1).next();
    let event_list = if let Some(a) = prg_args {
        a
    } else {
        std::env::var("PMU_EVENTS")?
    };

    // Parse event list
    let catalog = EventCatalog::from_file(event_list)?;
    let tool = PerfTool::probe()?;

    // Get perf strings
    let exprs = catalog.perf_expressions(&tool)?;

    // Dump perf strings
    info!("core: {}", exprs.core);
    info!("cmn: {}", exprs.cmn);
    println!("{}", exprs.core);
    if !exprs.cmn.is_empty() {
        println!("{}", exprs.cmn);
    }

    Ok(())
}
