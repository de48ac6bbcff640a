use stratus_core::prelude::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketLimits {
    pub max_size: u64,
    pub max_files: usize,
    /// Number of buckets created up front; files spill into new buckets once
    /// none of these fit.
    pub initial: usize,
}

impl Default for BucketLimits {
    fn default() -> Self {
        Self {
            max_size: MAX_BUCKET_SIZE,
            max_files: MAX_BUCKET_FILE_COUNT,
            initial: BULK_UPLOAD_CONCURRENCY,
        }
    }
}

/// Files sent together in one upload call.
#[derive(Debug, Clone, Default)]
pub struct UploadBucket {
    pub files: Vec<FileEntry>,
    pub remaining_size: u64,
}

impl UploadBucket {
    fn new(max_size: u64) -> Self {
        Self {
            files: Vec::new(),
            remaining_size: max_size,
        }
    }

    fn fits(&self, file: &FileEntry, limits: &BucketLimits) -> bool {
        self.remaining_size >= file.size && self.files.len() < limits.max_files
    }

    fn push(&mut self, file: FileEntry) {
        self.remaining_size = self.remaining_size.saturating_sub(file.size);
        self.files.push(file);
    }

    pub fn size(&self) -> u64 {
        self.files.iter().map(|f| f.size).sum()
    }
}

/// Packs files into buckets, largest first.
///
/// The starting bucket rotates with every file so that the initial buckets
/// fill evenly instead of bucket 0 taking everything that fits. Only
/// non-empty buckets are returned.
pub fn pack_buckets(mut files: Vec<FileEntry>, limits: BucketLimits) -> Vec<UploadBucket> {
    files.sort_by(|a, b| {
        b.size
            .cmp(&a.size)
            .then_with(|| a.relative_path.cmp(&b.relative_path))
    });

    let mut buckets: Vec<UploadBucket> = (0..limits.initial.max(1))
        .map(|_| UploadBucket::new(limits.max_size))
        .collect();
    let mut offset = 0usize;

    for file in files {
        let count = buckets.len();
        let slot = (0..count)
            .map(|i| (i + offset) % count)
            .find(|&index| buckets[index].fits(&file, &limits));

        match slot {
            Some(index) => buckets[index].push(file),
            None => {
                let mut bucket = UploadBucket::new(limits.max_size);
                bucket.push(file);
                buckets.push(bucket);
            }
        }
        offset += 1;
    }

    buckets.retain(|bucket| !bucket.files.is_empty());
    buckets
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn file(name: &str, size: u64) -> FileEntry {
        FileEntry {
            relative_path: name.to_string(),
            absolute_path: name.into(),
            size,
            hash: AssetHash::from_bytes([size as u8; 16]),
            content_type: "application/octet-stream".into(),
        }
    }

    fn limits(max_size: u64, max_files: usize) -> BucketLimits {
        BucketLimits {
            max_size,
            max_files,
            initial: 3,
        }
    }

    #[test]
    fn respects_size_and_count_limits() {
        let files: Vec<_> = (0..50)
            .map(|i| file(&format!("f{i}"), (i % 7 + 1) * 10))
            .collect();
        let limits = limits(100, 4);

        let buckets = pack_buckets(files.clone(), limits);

        for bucket in &buckets {
            assert!(bucket.size() <= limits.max_size);
            assert!(bucket.files.len() <= limits.max_files);
            assert_eq!(bucket.remaining_size, limits.max_size - bucket.size());
        }

        let placed: Vec<_> = buckets
            .iter()
            .flat_map(|b| b.files.iter().map(|f| f.relative_path.clone()))
            .collect();
        let unique: HashSet<_> = placed.iter().collect();
        assert_eq!(placed.len(), files.len());
        assert_eq!(unique.len(), files.len());
    }

    #[test]
    fn spreads_files_round_robin() {
        let files = vec![file("a", 3), file("b", 2), file("c", 1)];

        let buckets = pack_buckets(files, limits(100, 10));

        assert_eq!(buckets.len(), 3);
        assert_eq!(buckets[0].files[0].relative_path, "a");
        assert_eq!(buckets[1].files[0].relative_path, "b");
        assert_eq!(buckets[2].files[0].relative_path, "c");
    }

    #[test]
    fn spills_into_new_buckets() {
        let files = vec![file("a", 90), file("b", 90), file("c", 90), file("d", 90)];

        let buckets = pack_buckets(files, limits(100, 10));

        assert_eq!(buckets.len(), 4);
        assert_eq!(buckets[3].files[0].relative_path, "d");
    }

    #[test]
    fn drops_empty_buckets() {
        let buckets = pack_buckets(vec![file("only", 1)], BucketLimits::default());
        assert_eq!(buckets.len(), 1);
        assert!(pack_buckets(Vec::new(), BucketLimits::default()).is_empty());
    }

    #[test]
    fn oversized_file_still_gets_a_bucket() {
        let buckets = pack_buckets(vec![file("huge", 500)], limits(100, 10));
        assert_eq!(buckets.len(), 1);
        assert_eq!(buckets[0].remaining_size, 0);
    }
}
