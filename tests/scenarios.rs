use disksort::{ConfigBuilder, SortedInDisk};
use rand::seq::SliceRandom;
use tempfile::TempDir;

fn key_after_first_pipe(line: &str) -> String {
    line.split('|').nth(1).unwrap().to_string()
}

fn session(dir: &TempDir, name: &str) -> ConfigBuilder {
    ConfigBuilder::new()
        .tmp_dir(dir.path().join(name))
        .only_one_read(false)
}

#[test]
fn basic_scenario_matches_the_documented_example() {
    let dir = TempDir::new().unwrap();
    let config = session(&dir, "basic").max_process(0).build();
    let mut s: SortedInDisk<String, String> = SortedInDisk::new(config).unwrap();
    for line in ["valA|key3|valD", "valB|key1|valE", "valC|key2|valF"] {
        s.ingest(key_after_first_pipe(line), line.to_string()).unwrap();
    }
    let got: Vec<String> = s.values().unwrap().collect::<disksort::Result<_>>().unwrap();
    assert_eq!(
        got,
        vec![
            "valB|key1|valE".to_string(),
            "valC|key2|valF".to_string(),
            "valA|key3|valD".to_string(),
        ]
    );
}

#[test]
fn append_scenario_matches_the_documented_example() {
    let dir = TempDir::new().unwrap();
    let tmp_dir = dir.path().join("append");

    {
        let config = ConfigBuilder::new()
            .tmp_dir(tmp_dir.clone())
            .max_process(0)
            .only_one_read(false)
            .build();
        let mut s: SortedInDisk<String, String> = SortedInDisk::new(config).unwrap();
        for line in ["valA|key3|valD", "valB|key1|valE", "valC|key2|valF"] {
            s.ingest(key_after_first_pipe(line), line.to_string()).unwrap();
        }
        s.join().unwrap();
    }

    let config = ConfigBuilder::new()
        .tmp_dir(tmp_dir)
        .max_process(0)
        .append(true)
        .only_one_read(false)
        .build();
    let mut s: SortedInDisk<String, String> = SortedInDisk::new(config).unwrap();
    for line in ["valG|key4|valJ", "valH|key0|valK"] {
        s.ingest(key_after_first_pipe(line), line.to_string()).unwrap();
    }

    let got: Vec<String> = s.values().unwrap().collect::<disksort::Result<_>>().unwrap();
    assert_eq!(
        got,
        vec![
            "valH|key0|valK".to_string(),
            "valB|key1|valE".to_string(),
            "valC|key2|valF".to_string(),
            "valA|key3|valD".to_string(),
            "valG|key4|valJ".to_string(),
        ]
    );
}

#[test]
fn reverse_scenario_matches_the_documented_example() {
    let dir = TempDir::new().unwrap();
    let config = session(&dir, "reverse").max_process(0).reverse(true).build();
    let mut s: SortedInDisk<String, String> = SortedInDisk::new(config).unwrap();
    for v in ["b", "a", "c"] {
        s.ingest(v.to_string(), v.to_string()).unwrap();
    }
    let got: Vec<String> = s.values().unwrap().collect::<disksort::Result<_>>().unwrap();
    assert_eq!(got, vec!["c".to_string(), "b".to_string(), "a".to_string()]);
}

#[test]
fn spill_stress_under_a_tight_memory_ceiling_produces_several_index_files_and_stays_sorted() {
    let dir = TempDir::new().unwrap();
    let tmp_dir = dir.path().join("spill-stress");
    let config = ConfigBuilder::new()
        .tmp_dir(tmp_dir.clone())
        .max_process(0)
        .count_insert_to_check(50)
        .max_process_size(None)
        .only_one_read(false)
        .build();
    let mut s: SortedInDisk<i32, String> = SortedInDisk::new(config).unwrap();

    let mut keys: Vec<i32> = (0..2_000).collect();
    keys.shuffle(&mut rand::thread_rng());
    for k in &keys {
        s.ingest(*k, format!("v{}", k)).unwrap();
    }

    s.join().unwrap();

    let index_files = walkdir::WalkDir::new(&tmp_dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| {
            e.file_name()
                .to_str()
                .map(|n| n.starts_with("keys_sorted_"))
                .unwrap_or(false)
        })
        .count();
    assert!(index_files >= 3, "expected at least 3 index files, got {}", index_files);

    let got: Vec<i32> = s
        .keys()
        .unwrap()
        .collect::<disksort::Result<Vec<_>>>()
        .unwrap();
    assert_eq!(got.len(), 2_000);
    assert!(got.windows(2).all(|w| w[0] <= w[1]));
}

#[test]
fn clear_is_idempotent_when_called_twice() {
    let dir = TempDir::new().unwrap();
    let config = session(&dir, "clear-idempotent").max_process(0).build();
    let mut s: SortedInDisk<String, String> = SortedInDisk::new(config).unwrap();
    s.ingest("a".to_string(), "va".to_string()).unwrap();
    s.clear().unwrap();
    s.clear().unwrap();
}

#[test]
fn equal_keys_on_a_single_worker_preserve_ingestion_order() {
    let dir = TempDir::new().unwrap();
    let config = session(&dir, "equal-keys").max_process(0).build();
    let mut s: SortedInDisk<String, String> = SortedInDisk::new(config).unwrap();
    for v in ["v1", "v2", "v3"] {
        s.ingest("k".to_string(), v.to_string()).unwrap();
    }
    let got: Vec<String> = s.values().unwrap().collect::<disksort::Result<_>>().unwrap();
    assert_eq!(got, vec!["v1".to_string(), "v2".to_string(), "v3".to_string()]);
}

#[test]
fn empty_input_yields_an_empty_output_and_zero_len() {
    let dir = TempDir::new().unwrap();
    let config = session(&dir, "empty").max_process(0).build();
    let mut s: SortedInDisk<String, String> = SortedInDisk::new(config).unwrap();
    assert_eq!(s.len().unwrap(), 0);
    let got: Vec<String> = s.values().unwrap().collect::<disksort::Result<_>>().unwrap();
    assert!(got.is_empty());
}

#[test]
fn only_one_read_deletes_the_directory_once_fully_consumed() {
    let dir = TempDir::new().unwrap();
    let tmp_dir = dir.path().join("only-one-read");
    let config = ConfigBuilder::new()
        .tmp_dir(tmp_dir.clone())
        .max_process(0)
        .only_one_read(true)
        .build();
    let mut s: SortedInDisk<String, String> = SortedInDisk::new(config).unwrap();
    for i in 0..5 {
        s.ingest(format!("k{}", i), format!("v{}", i)).unwrap();
    }
    let count = s.values().unwrap().count();
    assert_eq!(count, 5);
    assert!(!tmp_dir.exists());
}

#[test]
fn len_matches_the_count_of_the_merged_output() {
    let dir = TempDir::new().unwrap();
    let config = session(&dir, "len-matches").max_process(2).build();
    let mut s: SortedInDisk<i32, String> = SortedInDisk::new(config).unwrap();
    for i in 0..500 {
        s.ingest(i, format!("v{}", i)).unwrap();
    }
    let total = s.len().unwrap();
    let counted = s.values().unwrap().count() as u64;
    assert_eq!(total, counted);
    assert_eq!(total, 500);
}

#[test]
fn parallel_ingestion_across_several_workers_still_merges_into_one_sorted_stream() {
    let dir = TempDir::new().unwrap();
    let config = session(&dir, "parallel").max_process(4).count_insert_to_check(100).build();
    let mut s: SortedInDisk<i32, String> = SortedInDisk::new(config).unwrap();
    for i in (0..3_000).rev() {
        s.ingest(i, format!("v{}", i)).unwrap();
    }
    let got: Vec<i32> = s.keys().unwrap().collect::<disksort::Result<Vec<_>>>().unwrap();
    assert_eq!(got.len(), 3_000);
    assert!(got.windows(2).all(|w| w[0] <= w[1]));
}
