use log::info;
use pmu_metrics::postprocess::Postprocess;

fn usage() -> ! {
    eprintln!("usage: postprocess <events.txt> <metrics.csv> <capture.csv>...");
    eprintln!("  PMU_CPUS=<n|list>  PMU_DURATION=<seconds>  PMU_PERSOCKET=1  PMU_DEBUG=1");
    std::process::exit(2);
}

fn main() -> pmu_metrics::Result<()> {
    env_logger::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.len() < 3 {
        usage();
    }

    let mut job = Postprocess::build().event_list(&args[0]).output(&args[1]);
    for capture in &args[2..] {
        job = job.input(capture);
    }

    // Optional settings
    if let Ok(cpus) = std::env::var("PMU_CPUS") {
        job = match cpus.parse::<usize>() {
            Ok(n) => job.cpus(n),
            Err(_) => job.cpu_list(&cpus)?,
        };
    }
    if let Ok(duration) = std::env::var("PMU_DURATION") {
        job = job.duration(duration.parse()?);
    }
    if std::env::var("PMU_PERSOCKET").is_ok() {
        job = job.persocket();
    }
    if std::env::var("PMU_DEBUG").is_ok() {
        job = job.debug();
    }

    let report = job.run()?;
    info!(
        "{} samples written to {}",
        report.samples,
        report.metrics.display()
    );
    for row in report.summary.iter() {
        println!("{:>40} {:>20.4}", row.metric, row.average);
    }

    Ok(())
}
