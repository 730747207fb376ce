use crate::corpus::{ChunkRecord, Control, LabelRecord};
use crate::error::Result;
use rusqlite::{params, Connection};
use std::collections::BTreeMap;

/// Load control profiles with their checklist items in position order.
pub fn load_controls(conn: &Connection) -> Result<Vec<Control>> {
    let mut checklists: BTreeMap<String, Vec<String>> = BTreeMap::new();
    {
        let mut stmt = conn.prepare(
            "SELECT control_id, text FROM checklist_items ORDER BY control_id, position, id",
        )?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?;
        for row in rows {
            let (control_id, text) = row?;
            checklists.entry(control_id).or_default().push(text);
        }
    }

    let mut stmt = conn.prepare("SELECT id, code, title, description FROM controls ORDER BY id")?;
    let rows = stmt.query_map([], |row| {
        Ok(Control {
            id: row.get(0)?,
            code: row.get(1)?,
            title: row.get(2)?,
            description: row.get(3)?,
            checklist: Vec::new(),
        })
    })?;

    let mut controls = Vec::new();
    for row in rows {
        let mut control = row?;
        control.checklist = checklists.remove(&control.id).unwrap_or_default();
        controls.push(control);
    }
    Ok(controls)
}

/// Load evidence chunks in insertion order.
pub fn load_chunks(conn: &Connection) -> Result<Vec<ChunkRecord>> {
    let mut stmt =
        conn.prepare("SELECT control_id, chunk_id, text FROM evidence_chunks ORDER BY rowid")?;
    let rows = stmt.query_map([], |row| {
        Ok(ChunkRecord {
            control_id: row.get(0)?,
            chunk_id: row.get(1)?,
            text: row.get(2)?,
        })
    })?;
    Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
}

/// Load graded relevance labels. Negative grades are read as 0.
pub fn load_labels(conn: &Connection) -> Result<Vec<LabelRecord>> {
    let mut stmt = conn.prepare(
        "SELECT control_id, chunk_id, relevance FROM relevance_labels ORDER BY rowid",
    )?;
    let rows = stmt.query_map([], |row| {
        let relevance: i64 = row.get(2)?;
        Ok(LabelRecord {
            control_id: row.get(0)?,
            chunk_id: row.get(1)?,
            relevance: relevance.clamp(0, u8::MAX as i64) as u8,
        })
    })?;
    Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
}

/// Write a full dataset in one transaction, replacing whatever was there.
pub fn replace_all(
    conn: &mut Connection,
    controls: &[Control],
    chunks: &[ChunkRecord],
    labels: &[LabelRecord],
) -> Result<()> {
    let tx = conn.transaction()?;
    tx.execute_batch(
        "DELETE FROM relevance_labels; \
         DELETE FROM evidence_chunks; \
         DELETE FROM checklist_items; \
         DELETE FROM controls;",
    )?;

    {
        let mut insert_control = tx.prepare(
            "INSERT INTO controls (id, code, title, description) VALUES (?1, ?2, ?3, ?4)",
        )?;
        let mut insert_item = tx.prepare(
            "INSERT INTO checklist_items (control_id, position, text) VALUES (?1, ?2, ?3)",
        )?;
        for control in controls {
            insert_control.execute(params![
                control.id,
                control.code,
                control.title,
                control.description
            ])?;
            for (position, item) in control.checklist.iter().enumerate() {
                insert_item.execute(params![control.id, position as i64, item])?;
            }
        }

        let mut insert_chunk = tx.prepare(
            "INSERT INTO evidence_chunks (chunk_id, control_id, text) VALUES (?1, ?2, ?3)",
        )?;
        for chunk in chunks {
            insert_chunk.execute(params![chunk.chunk_id, chunk.control_id, chunk.text])?;
        }

        let mut insert_label = tx.prepare(
            "INSERT INTO relevance_labels (control_id, chunk_id, relevance) VALUES (?1, ?2, ?3)",
        )?;
        for label in labels {
            insert_label.execute(params![label.control_id, label.chunk_id, label.relevance as i64])?;
        }
    }

    tx.commit()?;
    log::info!(
        "Wrote {} controls, {} chunks, {} labels",
        controls.len(),
        chunks.len(),
        labels.len()
    );
    Ok(())
}
