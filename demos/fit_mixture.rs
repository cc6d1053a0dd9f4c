use mixfit::{sample_mixture, Em, SecondMoment, Vb};
use rand::rngs::StdRng;
use rand::SeedableRng;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Fits report convergence at debug level.
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    let means = [-5.0, 5.0, 8.0];
    let variances = [0.5, 0.5, 1.0];
    let weights = [0.2, 0.5, 0.3];

    let mut rng = StdRng::seed_from_u64(42);
    let data = sample_mixture(1000, &means, &variances, &weights, &mut rng)?;

    let em = Em::new(3).with_n_init(5).fit(&data, &mut rng)?;
    let vb = Vb::new(3).with_n_init(5).fit(&data, &mut rng)?;
    let legacy = Vb::new(3)
        .with_n_init(5)
        .with_second_moment(SecondMoment::Legacy)
        .fit(&data, &mut rng)?;

    println!("truth   means={means:?} variances={variances:?} weights={weights:?}");
    for (name, params, objective, iterations) in [
        ("em", em.params.sorted_by_mean(), em.log_likelihood, em.iterations),
        ("vb", vb.params.sorted_by_mean(), vb.elbo, vb.iterations),
        ("vb-old", legacy.params.sorted_by_mean(), legacy.elbo, legacy.iterations),
    ] {
        println!(
            "{name:<7} means={:.3?} variances={:.3?} weights={:.3?} objective={objective:.2} iters={iterations}",
            params.means, params.variances, params.weights
        );
    }

    Ok(())
}
