use anyhow::{Context, Result};

use kymo_stats::data::model::NUMERIC_FEATURES;

/// Minimal deterministic PRNG (xoshiro256**)
struct SimpleRng {
    state: [u64; 4],
}

impl SimpleRng {
    fn new(seed: u64) -> Self {
        let mut s = [0u64; 4];
        let mut x = seed;
        for slot in &mut s {
            x = x.wrapping_mul(6364136223846793005).wrapping_add(1);
            *slot = x;
        }
        SimpleRng { state: s }
    }

    fn next_u64(&mut self) -> u64 {
        let result = (self.state[1].wrapping_mul(5))
            .rotate_left(7)
            .wrapping_mul(9);
        let t = self.state[1] << 17;
        self.state[2] ^= self.state[0];
        self.state[3] ^= self.state[1];
        self.state[1] ^= self.state[2];
        self.state[0] ^= self.state[3];
        self.state[2] ^= t;
        self.state[3] = self.state[3].rotate_left(45);
        result
    }

    fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    /// Box-Muller transform for normal distribution
    fn gauss(&mut self, mean: f64, std_dev: f64) -> f64 {
        let u1 = self.next_f64().max(1e-15);
        let u2 = self.next_f64();
        let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
        mean + std_dev * z
    }

    fn range(&mut self, lo: i64, hi: i64) -> i64 {
        lo + (self.next_u64() % (hi - lo) as u64) as i64
    }
}

/// Growth regime per kymograph: (growth rate, shrink rate, catastrophe frequency).
const KYMOGRAPHS: [(&str, f64, f64, f64); 3] = [
    ("kymo_control.tif", 1.2, -8.0, 0.004),
    ("kymo_taxol.tif", 0.6, -4.0, 0.001),
    ("kymo_nocodazole.tif", 0.9, -14.0, 0.010),
];

const STATS_PER_KYMOGRAPH: usize = 40;

fn main() -> Result<()> {
    let mut rng = SimpleRng::new(42);

    let output_path = "sample_stats.csv";
    let mut writer = csv::Writer::from_path(output_path).context("creating output file")?;

    let mut header = vec!["id", "group", "name"];
    header.extend(NUMERIC_FEATURES);
    writer.write_record(&header).context("writing header")?;

    let mut row_id: i64 = 0;
    for &(group, growth, shrink, catastrophe) in &KYMOGRAPHS {
        for i in 0..STATS_PER_KYMOGRAPH {
            let start = rng.range(0, 200);
            let end = start + rng.range(10, 120);
            let growth_rate = rng.gauss(growth, growth * 0.25).max(0.0);
            let shrink_rate = rng.gauss(shrink, shrink.abs() * 0.25).min(0.0);
            let catastrophe_freq = rng.gauss(catastrophe, catastrophe * 0.3).max(0.0);
            let rescue_freq = rng.gauss(catastrophe * 0.5, catastrophe * 0.2).max(0.0);
            let rate = growth_rate * (end - start) as f64 / 100.0;

            writer
                .write_record([
                    row_id.to_string(),
                    group.to_string(),
                    format!("MT {i}"),
                    format!("{rate:.4}"),
                    start.to_string(),
                    end.to_string(),
                    format!("{growth_rate:.4}"),
                    format!("{shrink_rate:.4}"),
                    format!("{catastrophe_freq:.6}"),
                    format!("{rescue_freq:.6}"),
                ])
                .with_context(|| format!("writing row {row_id}"))?;
            row_id += 1;
        }
    }
    writer.flush().context("flushing output file")?;

    println!(
        "Wrote {row_id} stats ({} kymographs) to {output_path}",
        KYMOGRAPHS.len()
    );
    Ok(())
}
