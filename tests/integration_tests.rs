use popgrid::source::for_each_record;
use popgrid::{
    BuildKey, BuildParams, BuildState, Config, FileSource, OverlapPolicy, PopGridError,
    PopulationQuery, PopulationService, Preprocessor, QueryEngine, QueryRectangle, RegionPolicy,
};
use popgrid_types::GridResolution;
use std::io::Write;
use std::sync::Arc;
use tempfile::NamedTempFile;

const HEADER: &str = "STATEFP,COUNTYFP,TRACTCE,BLKGRPCE,POPULATION,LATITUDE,LONGITUDE";

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn write_dataset(lines: &[String]) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "{}", HEADER).unwrap();
    for line in lines {
        writeln!(file, "{}", line).unwrap();
    }
    file.flush().unwrap();
    file
}

/// Deterministic pseudo-census covering most of the continental US, with a
/// sprinkling of bad lines and records from Alaska, Hawaii and Puerto Rico.
fn census_like(count: usize) -> Vec<String> {
    let mut lines = Vec::with_capacity(count);
    let mut state: u64 = 0x2545_f491_4f6c_dd1d;
    for i in 0..count {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        let lat = 24.5 + (state % 24_800) as f64 / 1_000.0;
        let lon = -124.9 + ((state >> 20) % 57_900) as f64 / 1_000.0;
        let population = (state >> 40) % 4_000;
        let line = match i % 97 {
            13 => "01,001,000000,1,unknown,+32.0,-86.0".to_string(),
            29 => "01,001,000000".to_string(),
            41 => format!("02,020,{:06},1,{},+61.2,-149.9", i, population),
            53 => format!("15,003,{:06},1,{},+21.3,-157.8", i, population),
            _ => format!("{:02},{:03},{:06},1,{},{:+.6},{:+.6}", i % 56, i % 300, i, population, lat, lon),
        };
        lines.push(line);
    }
    lines
}

fn contiguous_total(source: &FileSource) -> i64 {
    let usa = RegionPolicy::continental_usa().bounds().unwrap();
    let mut total = 0;
    for_each_record(source, |record| {
        if usa.contains(record.longitude, record.latitude) {
            total += record.population;
        }
    })
    .unwrap();
    total
}

#[test]
fn test_concrete_three_record_scenario() {
    init_logging();
    let file = write_dataset(&[
        "36,061,000100,1,100,40.0,-74.0".to_string(),
        "06,037,000100,1,200,34.0,-118.0".to_string(),
        "00,000,000000,0,50,90.0,-74.0".to_string(),
    ]);
    let source = FileSource::new(file.path());
    let service = PopulationService::builder().build().unwrap();
    let params = BuildParams::new(2, 2, 1);

    let east_coast = service
        .single_interaction(&source, params, -80.0, 35.0, -70.0, 45.0)
        .unwrap();
    assert_eq!(east_coast.population, 100);

    let full = service
        .single_interaction(&source, params, -125.0, 24.396308, -66.93457, 49.384358)
        .unwrap();
    assert_eq!(full.population, 300);
    assert_eq!(full.percent, 100.0);

    let index = service.index(&source, params).unwrap();
    assert_eq!(index.stats().outside_region, 1);
}

#[test]
fn test_partition_totality_and_full_bounds() {
    init_logging();
    let file = write_dataset(&census_like(5_000));
    let source = FileSource::new(file.path());
    let expected = contiguous_total(&source);

    for policy in [
        OverlapPolicy::AnyOverlap,
        OverlapPolicy::CellCenter,
        OverlapPolicy::Exact,
    ] {
        let config = Config::default().with_shards(8).with_overlap_policy(policy);
        let index = Preprocessor::new(config)
            .build(&source, GridResolution::new(50, 25))
            .unwrap();
        assert_eq!(index.total(), expected);
        assert_eq!(index.cells().iter().sum::<i64>(), expected);

        let full = QueryRectangle::from(*index.bounds());
        assert_eq!(QueryEngine::new(policy).query(&index, &full), expected);
    }
}

#[test]
fn test_malformed_lines_do_not_count() {
    init_logging();
    let file = write_dataset(&census_like(970));
    let source = FileSource::new(file.path());
    let index = Preprocessor::new(Config::default().with_shards(4))
        .build(&source, GridResolution::square(10))
        .unwrap();

    let stats = index.stats();
    assert_eq!(stats.scan.lines, 970);
    assert_eq!(stats.scan.malformed, 20);
    assert_eq!(stats.outside_region, 20);
    assert_eq!(stats.indexed, 930);
}

#[test]
fn test_shard_count_invariance_on_file() {
    init_logging();
    let file = write_dataset(&census_like(3_000));
    let source = FileSource::new(file.path());
    let resolution = GridResolution::new(40, 30);

    let reference = Preprocessor::new(Config::default().with_shards(1).with_workers(1))
        .build(&source, resolution)
        .unwrap();
    for shards in [2, 3, 8, 31, 256] {
        let index = Preprocessor::new(Config::default().with_shards(shards).with_workers(4))
            .build(&source, resolution)
            .unwrap();
        assert_eq!(index.cells(), reference.cells(), "{} shards", shards);
    }
}

#[test]
fn test_query_is_independent_of_worker_count() {
    init_logging();
    let file = write_dataset(&census_like(2_000));
    let source = FileSource::new(file.path());
    let queries = [
        QueryRectangle::new(-100.0, 30.0, -80.0, 45.0),
        QueryRectangle::new(-124.0, 25.0, -67.0, 49.0),
        QueryRectangle::new(-90.3, 38.1, -89.7, 38.9),
    ];

    let mut answers = Vec::new();
    for workers in [1, 2, 6] {
        let service = PopulationService::builder()
            .workers(workers)
            .shards(workers * 3)
            .build()
            .unwrap();
        let params = BuildParams::new(64, 32, 1);
        let row: Vec<i64> = queries
            .iter()
            .map(|rect| service.query(&source, params, rect).unwrap())
            .collect();
        answers.push(row);
    }
    assert!(answers.windows(2).all(|pair| pair[0] == pair[1]));
}

#[test]
fn test_monotonic_queries_on_census_data() {
    init_logging();
    let file = write_dataset(&census_like(2_000));
    let source = FileSource::new(file.path());

    for policy in [
        OverlapPolicy::AnyOverlap,
        OverlapPolicy::CellCenter,
        OverlapPolicy::Exact,
    ] {
        let handle = PopulationQuery::new(
            FileSource::new(source.path()),
            BuildParams::new(30, 20, 1),
            Config::default().with_overlap_policy(policy),
        )
        .unwrap();

        let mut previous = 0;
        for step in 1..=30 {
            let grow = step as f64;
            let population = handle
                .query(&QueryRectangle::new(-95.0 - grow, 37.0 - grow / 2.0, -95.0 + grow, 37.0 + grow / 2.0))
                .unwrap();
            assert!(population >= previous, "{:?} step {}", policy, step);
            previous = population;
        }
    }
}

#[test]
fn test_exact_never_exceeds_conservative() {
    init_logging();
    let file = write_dataset(&census_like(2_000));
    let source = FileSource::new(file.path());
    let exact = Preprocessor::new(Config::default().with_overlap_policy(OverlapPolicy::Exact))
        .build(&source, GridResolution::new(20, 10))
        .unwrap();
    let rect = QueryRectangle::new(-101.3, 31.7, -83.2, 42.9);

    let precise = QueryEngine::new(OverlapPolicy::Exact).query(&exact, &rect);
    let conservative = QueryEngine::new(OverlapPolicy::AnyOverlap).query(&exact, &rect);
    assert!(precise <= conservative);

    let mut brute_force = 0;
    for_each_record(&source, |record| {
        if record.longitude >= rect.west
            && record.longitude <= rect.east
            && record.latitude >= rect.south
            && record.latitude <= rect.north
        {
            brute_force += record.population;
        }
    })
    .unwrap();
    assert_eq!(precise, brute_force);
}

#[test]
fn test_concurrent_queries_share_one_index() {
    init_logging();
    let file = write_dataset(&census_like(1_500));
    let source = Arc::new(FileSource::new(file.path()));
    let service = Arc::new(PopulationService::builder().shards(4).build().unwrap());
    let params = BuildParams::new(25, 25, 3);
    let expected = service
        .query(source.as_ref(), params, &QueryRectangle::new(-110.0, 30.0, -85.0, 45.0))
        .unwrap();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let source = Arc::clone(&source);
            let service = Arc::clone(&service);
            std::thread::spawn(move || {
                service
                    .query(source.as_ref(), params, &QueryRectangle::new(-110.0, 30.0, -85.0, 45.0))
                    .unwrap()
            })
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.join().unwrap(), expected);
    }
    assert_eq!(service.build_count(), 1);
    assert_eq!(
        service.state(&BuildKey::new(source.as_ref(), params)),
        BuildState::Ready
    );
}

#[test]
fn test_missing_dataset_fails_build() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let handle = PopulationQuery::new(
        FileSource::new(dir.path().join("CenPop2010.txt")),
        BuildParams::new(10, 10, 1),
        Config::default(),
    )
    .unwrap();

    let err = handle.single_interaction(-80.0, 35.0, -70.0, 45.0).unwrap_err();
    assert!(matches!(err.root(), PopGridError::Io(_)));
    assert_eq!(handle.state(), BuildState::Unbuilt);
}

#[test]
fn test_data_extent_includes_every_state() {
    init_logging();
    let file = write_dataset(&census_like(970));
    let source = FileSource::new(file.path());
    let index = Preprocessor::new(Config::default().with_region(RegionPolicy::DataExtent))
        .build(&source, GridResolution::square(16))
        .unwrap();

    let mut expected = 0;
    for_each_record(&source, |record| expected += record.population).unwrap();
    assert_eq!(index.total(), expected);
    assert_eq!(index.stats().outside_region, 0);
    assert!(index.bounds().west() <= -157.8);
    assert!(index.bounds().north() >= 61.2);
}
