use std::path::{Path, PathBuf};

/// Tunables for one [`crate::SortedInDisk`] session.
///
/// Mirrors the keyword arguments accepted by the original `sorted_in_disk()` entry
/// point: a single struct instead of a dozen parameters, built with [`ConfigBuilder`].
#[derive(Clone, Debug)]
pub struct Config {
    pub(crate) reverse: bool,
    pub(crate) tmp_dir: PathBuf,
    pub(crate) ensure_different_dirs: bool,
    pub(crate) append: bool,
    pub(crate) only_one_read: bool,
    pub(crate) count_insert_to_check: u64,
    pub(crate) max_process_size: Option<u64>,
    pub(crate) ensure_space: bool,
    pub(crate) max_process: u32,
    pub(crate) queue_max_size: usize,
    pub(crate) iter_multiprocessing: bool,
    pub(crate) iter_m_queue_max_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            reverse: false,
            tmp_dir: PathBuf::from("sortInDiskTmps"),
            ensure_different_dirs: false,
            append: false,
            only_one_read: true,
            count_insert_to_check: 1_000_000,
            max_process_size: Some(1024 * 1024 * 1024),
            ensure_space: false,
            max_process: num_cpus::get() as u32,
            queue_max_size: 1000,
            iter_multiprocessing: false,
            iter_m_queue_max_size: 1000,
        }
    }
}

/// Builder for [`Config`]. Every setter matches a keyword argument of the
/// original `sorted_in_disk()` call.
#[derive(Clone, Debug, Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        ConfigBuilder::default()
    }

    pub fn reverse(mut self, reverse: bool) -> Self {
        self.config.reverse = reverse;
        self
    }

    pub fn tmp_dir(mut self, tmp_dir: impl AsRef<Path>) -> Self {
        self.config.tmp_dir = tmp_dir.as_ref().to_path_buf();
        self
    }

    pub fn ensure_different_dirs(mut self, ensure_different_dirs: bool) -> Self {
        self.config.ensure_different_dirs = ensure_different_dirs;
        self
    }

    pub fn append(mut self, append: bool) -> Self {
        self.config.append = append;
        self
    }

    pub fn only_one_read(mut self, only_one_read: bool) -> Self {
        self.config.only_one_read = only_one_read;
        self
    }

    pub fn count_insert_to_check(mut self, count: u64) -> Self {
        self.config.count_insert_to_check = count;
        self
    }

    /// `None` disables RSS probing entirely; only the insert counter trips a spill.
    pub fn max_process_size(mut self, max_process_size: Option<u64>) -> Self {
        self.config.max_process_size = max_process_size;
        self
    }

    pub fn ensure_space(mut self, ensure_space: bool) -> Self {
        self.config.ensure_space = ensure_space;
        self
    }

    /// `0` selects single-worker mode: ingestion runs on the caller's thread with no
    /// dispatch channel.
    pub fn max_process(mut self, max_process: u32) -> Self {
        self.config.max_process = max_process;
        self
    }

    pub fn queue_max_size(mut self, queue_max_size: usize) -> Self {
        self.config.queue_max_size = queue_max_size;
        self
    }

    pub fn iter_multiprocessing(mut self, iter_multiprocessing: bool) -> Self {
        self.config.iter_multiprocessing = iter_multiprocessing;
        self
    }

    pub fn iter_m_queue_max_size(mut self, iter_m_queue_max_size: usize) -> Self {
        self.config.iter_m_queue_max_size = iter_m_queue_max_size;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
