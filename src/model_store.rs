use std::path::Path;

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};

use crate::{bmn::BmnModel, error::Result, names::TypeName, options::Options};

/// Type identifier -> JSON-encoded [`BmnModel`].
const MODELS: TableDefinition<&str, &[u8]> = TableDefinition::new("models");
const META: TableDefinition<&str, &str> = TableDefinition::new("meta");

const OPTIONS_KEY: &str = "options";

/// Persistent per-type BMN models, plus the options they were mined with.
pub struct ModelStore {
    db: Database,
}

impl ModelStore {
    pub fn open(path: &Path) -> Result<Self> {
        let db = Database::create(path)?;

        let txn = db.begin_write()?;
        txn.open_table(MODELS)?;
        txn.open_table(META)?;
        txn.commit()?;

        Ok(Self { db })
    }

    /// Store `model` under its type, replacing any previous one.
    pub fn store(&self, model: &BmnModel) -> Result<()> {
        let encoded = serde_json::to_vec(model)?;
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(MODELS)?;
            table.insert(model.r#type.identifier().as_str(), encoded.as_slice())?;
        }
        txn.commit()?;
        Ok(())
    }

    pub fn load(&self, t: &TypeName) -> Result<Option<BmnModel>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(MODELS)?;
        match table.get(t.identifier().as_str())? {
            Some(v) => Ok(Some(serde_json::from_slice(v.value())?)),
            None => Ok(None),
        }
    }

    pub fn has_model(&self, t: &TypeName) -> Result<bool> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(MODELS)?;
        Ok(table.get(t.identifier().as_str())?.is_some())
    }

    /// Identifiers of every stored model, sorted.
    pub fn list_types(&self) -> Result<Vec<String>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(MODELS)?;
        let mut result = Vec::new();
        for entry in table.iter()? {
            let (k, _) = entry?;
            result.push(k.value().to_string());
        }
        Ok(result)
    }

    /// Remove every model and the recorded options.
    pub fn clear(&self) -> Result<()> {
        let txn = self.db.begin_write()?;
        txn.delete_table(MODELS)?;
        txn.delete_table(META)?;
        txn.open_table(MODELS)?;
        txn.open_table(META)?;
        txn.commit()?;
        Ok(())
    }

    /// Options the stored models were mined with, if recorded.
    pub fn options(&self) -> Result<Option<Options>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(META)?;
        let Some(v) = table.get(OPTIONS_KEY)? else {
            return Ok(None);
        };
        Ok(Some(v.value().parse()?))
    }

    pub fn set_options(&self, options: &Options) -> Result<()> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(META)?;
            table.insert(OPTIONS_KEY, options.to_string().as_str())?;
        }
        txn.commit()?;
        Ok(())
    }
}

impl std::fmt::Debug for ModelStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelStore").finish_non_exhaustive()
    }
}
