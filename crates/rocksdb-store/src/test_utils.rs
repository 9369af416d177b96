use std::sync::Arc;

use rockbound::{rocksdb, OptimisticTransactionDB};
use tempfile::TempDir;

use crate::{DbOpsConfig, ObserverDb};

pub fn get_rocksdb_tmp_instance() -> anyhow::Result<(Arc<OptimisticTransactionDB>, DbOpsConfig)> {
    let cfs = crate::STORE_COLUMN_FAMILIES;
    let dbname = crate::ROCKSDB_NAME;
    let mut opts = rocksdb::Options::default();

    opts.create_missing_column_families(true);
    opts.create_if_missing(true);

    let temp_dir = TempDir::new()?;

    let rbdb = rockbound::OptimisticTransactionDB::open(
        temp_dir.into_path(),
        dbname,
        cfs.iter().map(|s| s.to_string()),
        &opts,
    )?;

    let db_ops = DbOpsConfig { retry_count: 5 };

    Ok((Arc::new(rbdb), db_ops))
}

pub fn get_observer_tmp_db() -> anyhow::Result<Arc<ObserverDb>> {
    let (rbdb, db_ops) = get_rocksdb_tmp_instance()?;
    Ok(Arc::new(ObserverDb::new(rbdb, db_ops)))
}
