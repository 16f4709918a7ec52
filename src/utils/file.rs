use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::models::JobId;

/// Nome del file di output derivato dall'ultimo segmento dell'URL sorgente
///
/// Query string e fragment vengono ignorati, il nome viene decodificato e
/// ripulito da separatori di percorso. Se non resta nulla di utilizzabile si
/// ricade su `image-<index>.jpg`.
pub fn output_filename(source: &str, index: usize) -> String {
    let without_query = source
        .split(['?', '#'])
        .next()
        .unwrap_or("")
        .trim_end_matches('/');

    let last = without_query.rsplit('/').next().unwrap_or("");
    let decoded = urlencoding::decode(last)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| last.to_string());

    let name: String = decoded
        .chars()
        .filter(|c| !matches!(c, '/' | '\\' | '\0'))
        .collect();
    let name = name.trim();

    // Un URL senza path (es. "https://host") ha come ultimo segmento l'host
    let is_host_only = without_query.ends_with(&format!("//{}", last));

    if name.is_empty() || name == "." || name == ".." || is_host_only {
        format!("image-{}.jpg", index)
    } else {
        name.to_string()
    }
}

/// Nomi di output per tutte le sorgenti di un job, senza ripetizioni.
///
/// Se due URL finiscono con lo stesso segmento il secondo diventa
/// `nome-1.ext`, poi `nome-2.ext` e così via. A parità di sorgenti il
/// risultato è sempre lo stesso, quindi una riconsegna sovrascrive gli stessi
/// file.
pub fn output_filenames(sources: &[String]) -> Vec<String> {
    let mut used = HashSet::new();

    sources
        .iter()
        .enumerate()
        .map(|(index, source)| {
            let name = output_filename(source, index);
            if used.insert(name.clone()) {
                return name;
            }

            let (stem, ext) = match name.rfind('.') {
                Some(dot) if dot > 0 => name.split_at(dot),
                _ => (name.as_str(), ""),
            };
            let mut n = 1;
            loop {
                let candidate = format!("{}-{}{}", stem, n, ext);
                if used.insert(candidate.clone()) {
                    break candidate;
                }
                n += 1;
            }
        })
        .collect()
}

/// `<output_dir>/<job_id>/<filename>`
pub fn output_path(output_dir: &Path, job_id: JobId, filename: &str) -> PathBuf {
    output_dir.join(job_id.to_string()).join(filename)
}

/// Scrive i byte su disco creando la directory di destinazione se assente
pub async fn save_bytes(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, data).await?;
    tracing::debug!("Immagine salvata in {}", path.display());
    Ok(())
}
