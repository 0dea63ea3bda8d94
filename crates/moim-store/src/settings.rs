use rusqlite::params;

use crate::database::Database;
use crate::error::Result;

impl Database {
    /// Raw settings JSON, if any has been saved.
    pub fn load_settings_json(&self) -> Result<Option<String>> {
        let result = self
            .conn()
            .query_row("SELECT json FROM app_settings WHERE id = 1", [], |row| {
                row.get(0)
            });

        match result {
            Ok(json) => Ok(Some(json)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn save_settings_json(&self, json: &str) -> Result<()> {
        self.conn().execute(
            "INSERT INTO app_settings (id, json) VALUES (1, ?1)
             ON CONFLICT(id) DO UPDATE SET json = excluded.json",
            params![json],
        )?;
        Ok(())
    }
}
