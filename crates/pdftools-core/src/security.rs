//! Password protection with the PDF standard security handler
//!
//! Locking writes RC4 128-bit encryption (V2, R3). Unlocking opens R2/R3
//! RC4 documents and R4 documents using RC4 or AESV2 crypt filters, with
//! either the user or the owner password.

use crate::error::{PdfToolsError, Result};
use crate::loader::{self, save_document};
use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, KeyIvInit};
use lopdf::{Dictionary, Document, Object, ObjectId, ObjectStream, StringFormat};
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;

/// Password padding string (ISO 32000-1, 7.6.3.3)
const PASSWORD_PADDING: [u8; 32] = [
    0x28, 0xBF, 0x4E, 0x5E, 0x4E, 0x75, 0x8A, 0x41, 0x64, 0x00, 0x4E, 0x56, 0xFF, 0xFA, 0x01, 0x08,
    0x2E, 0x2E, 0x00, 0xB6, 0xD0, 0x68, 0x3E, 0x80, 0x2F, 0x0C, 0xA9, 0xFE, 0x64, 0x53, 0x69, 0x7A,
];

/// Key length written by `lock_document`, in bytes
const LOCK_KEY_LEN: usize = 16;

/// Type given to encrypted object streams held back for decryption
const SEALED_OBJECT_STREAM: &[u8] = b"PdfToolsSealedObjStm";

/// What a user opening the document with the user password may do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Permissions {
    pub print: bool,
    pub modify: bool,
    pub copy: bool,
    pub annotate: bool,
    pub fill_forms: bool,
    pub extract_accessibility: bool,
    pub assemble: bool,
    pub print_high_quality: bool,
}

impl Default for Permissions {
    fn default() -> Self {
        Self {
            print: true,
            modify: true,
            copy: true,
            annotate: true,
            fill_forms: true,
            extract_accessibility: true,
            assemble: true,
            print_high_quality: true,
        }
    }
}

impl Permissions {
    /// Encode as the signed 32-bit `/P` value
    pub fn to_p_value(&self) -> i32 {
        // Bits 7-8 and 13-32 are reserved and must be 1
        let mut bits: u32 = 0xFFFF_F0C0;
        let flags = [
            (self.print, 1 << 2),
            (self.modify, 1 << 3),
            (self.copy, 1 << 4),
            (self.annotate, 1 << 5),
            (self.fill_forms, 1 << 8),
            (self.extract_accessibility, 1 << 9),
            (self.assemble, 1 << 10),
            (self.print_high_quality, 1 << 11),
        ];
        for (allowed, bit) in flags {
            if allowed {
                bits |= bit;
            }
        }
        bits as i32
    }

    /// Decode a `/P` value
    pub fn from_p_value(p: i32) -> Self {
        let bits = p as u32;
        let has = |bit: u32| bits & (1 << bit) != 0;
        Self {
            print: has(2),
            modify: has(3),
            copy: has(4),
            annotate: has(5),
            fill_forms: has(8),
            extract_accessibility: has(9),
            assemble: has(10),
            print_high_quality: has(11),
        }
    }
}

/// Parameters for `lock_document`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockOptions {
    pub user_password: String,
    /// Defaults to the user password
    #[serde(default)]
    pub owner_password: Option<String>,
    #[serde(default)]
    pub permissions: Permissions,
}

impl LockOptions {
    pub fn new(user_password: impl Into<String>) -> Self {
        Self {
            user_password: user_password.into(),
            owner_password: None,
            permissions: Permissions::default(),
        }
    }

    pub fn with_owner_password(mut self, owner_password: impl Into<String>) -> Self {
        self.owner_password = Some(owner_password.into());
        self
    }

    pub fn with_permissions(mut self, permissions: Permissions) -> Self {
        self.permissions = permissions;
        self
    }
}

/// Check a newly chosen password against its confirmation and a minimum length
pub fn validate_new_password(password: &str, confirmation: &str, min_length: usize) -> Result<()> {
    if password != confirmation {
        return Err(PdfToolsError::InvalidParameter(
            "Passwords do not match".into(),
        ));
    }
    if password.chars().count() < min_length {
        return Err(PdfToolsError::InvalidParameter(format!(
            "Password must be at least {} characters",
            min_length
        )));
    }
    Ok(())
}

/// Encrypt a document with the given passwords and permissions
pub fn lock_document(bytes: &[u8], options: &LockOptions) -> Result<Vec<u8>> {
    if options.user_password.is_empty() {
        return Err(PdfToolsError::InvalidParameter(
            "User password must not be empty".into(),
        ));
    }

    let mut pdf = loader::load(bytes)?;
    let doc = pdf.document_mut();

    // Object and xref streams are expanded by the loader; the writer emits a
    // classic xref table, so the leftover containers would only carry stale data.
    doc.objects
        .retain(|_, obj| !stream_has_type(obj, b"ObjStm") && !stream_has_type(obj, b"XRef"));

    let doc_id = Md5::digest(bytes).to_vec();
    let owner_password = options
        .owner_password
        .as_deref()
        .filter(|p| !p.is_empty())
        .unwrap_or(&options.user_password);
    let p = options.permissions.to_p_value();

    let o = compute_o_value(
        owner_password.as_bytes(),
        options.user_password.as_bytes(),
        3,
        LOCK_KEY_LEN,
    );
    let key = compute_encryption_key(
        options.user_password.as_bytes(),
        &o,
        p,
        &doc_id,
        3,
        LOCK_KEY_LEN,
        true,
    );
    let u = compute_u_value(&key, &doc_id, 3);

    let object_ids: Vec<ObjectId> = doc.objects.keys().copied().collect();
    for id in object_ids {
        if let Some(obj) = doc.objects.get_mut(&id) {
            let object_key = rc4_object_key(&key, id);
            transform_object(obj, &|data| Ok(Arcfour::new(&object_key).process(data)), true)?;
        }
    }

    let mut encrypt = Dictionary::new();
    encrypt.set("Filter", Object::Name(b"Standard".to_vec()));
    encrypt.set("V", Object::Integer(2));
    encrypt.set("R", Object::Integer(3));
    encrypt.set("Length", Object::Integer((LOCK_KEY_LEN * 8) as i64));
    encrypt.set("O", Object::String(o, StringFormat::Hexadecimal));
    encrypt.set("U", Object::String(u, StringFormat::Hexadecimal));
    encrypt.set("P", Object::Integer(i64::from(p)));
    let encrypt_id = doc.add_object(encrypt);

    doc.trailer.set("Encrypt", Object::Reference(encrypt_id));
    doc.trailer.set(
        "ID",
        Object::Array(vec![
            Object::String(doc_id.clone(), StringFormat::Hexadecimal),
            Object::String(doc_id, StringFormat::Hexadecimal),
        ]),
    );

    info!(objects = doc.objects.len(), "Locked document");
    save_document(doc)
}

/// Remove password protection, writing an unencrypted copy
pub fn unlock_document(bytes: &[u8], password: &str) -> Result<Vec<u8>> {
    let mut pdf = loader::load_with_password(bytes, Some(password))?;
    if !pdf.was_encrypted() {
        debug!("Unlock requested for a document without encryption");
    }
    pdf.save()
}

/// Whether the trailer references an `/Encrypt` dictionary
pub(crate) fn is_encrypted(doc: &Document) -> bool {
    doc.trailer.get(b"Encrypt").is_ok()
}

/// Decrypt every string and stream in place and drop the `/Encrypt` entry
pub(crate) fn decrypt_document(doc: &mut Document, password: &str) -> Result<()> {
    let encrypt_obj = doc
        .trailer
        .get(b"Encrypt")
        .map_err(|_| PdfToolsError::Encryption("No Encrypt dictionary".into()))?
        .clone();

    let (encrypt_id, encrypt_dict) = match encrypt_obj {
        Object::Reference(id) => {
            let dict = doc
                .get_object(id)
                .and_then(Object::as_dict)
                .map_err(|_| PdfToolsError::Encryption("Invalid Encrypt dictionary".into()))?
                .clone();
            (Some(id), dict)
        }
        Object::Dictionary(dict) => (None, dict),
        _ => {
            return Err(PdfToolsError::Encryption(
                "Invalid Encrypt dictionary".into(),
            ))
        }
    };

    let doc_id = doc
        .trailer
        .get(b"ID")
        .and_then(Object::as_array)
        .ok()
        .and_then(|ids| ids.first())
        .and_then(|first| first.as_str().ok())
        .map(|s| s.to_vec())
        .unwrap_or_default();

    let handler = StandardSecurityHandler::open(&encrypt_dict, doc_id, password.as_bytes())?;

    let object_ids: Vec<ObjectId> = doc.objects.keys().copied().collect();
    for id in object_ids {
        if Some(id) == encrypt_id {
            continue;
        }
        if let Some(obj) = doc.objects.get_mut(&id) {
            handler.decrypt_object(id, obj)?;
        }
    }

    doc.trailer.remove(b"Encrypt");
    if let Some(id) = encrypt_id {
        doc.objects.remove(&id);
    }
    unpack_sealed_object_streams(doc);

    debug!(revision = handler.revision, "Decrypted document");
    Ok(())
}

/// Parser filter that keeps encrypted object streams intact.
///
/// The parser unpacks `/Type /ObjStm` containers while reading, which fails
/// on ciphertext and loses every object inside. Renamed, the container is
/// read as a plain stream, decrypted with its own object key, and unpacked
/// by [`decrypt_document`].
pub(crate) fn seal_object_stream(id: ObjectId, obj: &mut Object) -> Option<(ObjectId, Object)> {
    if let Object::Stream(stream) = obj {
        if stream.dict.type_is(b"ObjStm") {
            stream
                .dict
                .set("Type", Object::Name(SEALED_OBJECT_STREAM.to_vec()));
        }
    }
    Some((id, obj.clone()))
}

/// Expand decrypted object streams; objects already present win
fn unpack_sealed_object_streams(doc: &mut Document) {
    let sealed: Vec<ObjectId> = doc
        .objects
        .iter()
        .filter(|(_, obj)| stream_has_type(obj, SEALED_OBJECT_STREAM))
        .map(|(id, _)| *id)
        .collect();

    for id in sealed {
        let Some(Object::Stream(mut stream)) = doc.objects.remove(&id) else {
            continue;
        };
        stream.dict.set("Type", Object::Name(b"ObjStm".to_vec()));
        match ObjectStream::new(&mut stream) {
            Ok(unpacked) => {
                debug!(container = id.0, objects = unpacked.objects.len(), "Unpacked object stream");
                for (object_id, object) in unpacked.objects {
                    doc.objects.entry(object_id).or_insert(object);
                }
            }
            Err(e) => warn!(container = id.0, error = %e, "Unreadable object stream after decryption"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CryptMethod {
    Identity,
    Rc4,
    AesV2,
}

/// Standard security handler state after a successful authentication
struct StandardSecurityHandler {
    key: Vec<u8>,
    revision: i64,
    string_method: CryptMethod,
    stream_method: CryptMethod,
    encrypt_metadata: bool,
}

impl StandardSecurityHandler {
    fn open(encrypt: &Dictionary, doc_id: Vec<u8>, password: &[u8]) -> Result<Self> {
        let filter = encrypt
            .get(b"Filter")
            .and_then(Object::as_name)
            .unwrap_or(b"Standard");
        if filter != b"Standard" {
            return Err(PdfToolsError::Encryption(format!(
                "Unsupported security handler: {}",
                String::from_utf8_lossy(filter)
            )));
        }

        let v = dict_int(encrypt, b"V").unwrap_or(0);
        let revision = dict_int(encrypt, b"R")
            .ok_or_else(|| PdfToolsError::Encryption("Missing /R".into()))?;
        if !(2..=4).contains(&revision) {
            return Err(PdfToolsError::Encryption(format!(
                "Unsupported revision: R={}",
                revision
            )));
        }

        let o = dict_bytes(encrypt, b"O")?;
        let u = dict_bytes(encrypt, b"U")?;
        let p = dict_int(encrypt, b"P")
            .ok_or_else(|| PdfToolsError::Encryption("Missing /P".into()))? as i32;
        let encrypt_metadata = encrypt
            .get(b"EncryptMetadata")
            .and_then(Object::as_bool)
            .unwrap_or(true);

        let (string_method, stream_method, key_len) = if v >= 4 {
            let string_method = crypt_filter_method(encrypt, b"StrF")?;
            let stream_method = crypt_filter_method(encrypt, b"StmF")?;
            (string_method, stream_method, 16)
        } else {
            let key_len = if revision == 2 {
                5
            } else {
                (dict_int(encrypt, b"Length").unwrap_or(40).clamp(40, 128) / 8) as usize
            };
            (CryptMethod::Rc4, CryptMethod::Rc4, key_len)
        };

        let params = KeyParams {
            o: &o,
            u: &u,
            p,
            doc_id: &doc_id,
            revision,
            key_len,
            encrypt_metadata,
        };

        let key = params
            .authenticate_user(password)
            .or_else(|| params.authenticate_owner(password))
            .ok_or(PdfToolsError::IncorrectPassword)?;

        Ok(Self {
            key,
            revision,
            string_method,
            stream_method,
            encrypt_metadata,
        })
    }

    fn object_key(&self, id: ObjectId, method: CryptMethod) -> Vec<u8> {
        let mut hasher = Md5::new();
        hasher.update(&self.key);
        hasher.update(&id.0.to_le_bytes()[..3]);
        hasher.update(&id.1.to_le_bytes()[..2]);
        if method == CryptMethod::AesV2 {
            hasher.update(b"sAlT");
        }
        let digest = hasher.finalize();
        let n = (self.key.len() + 5).min(16);
        digest[..n].to_vec()
    }

    fn decrypt_bytes(&self, id: ObjectId, method: CryptMethod, data: &[u8]) -> Result<Vec<u8>> {
        match method {
            CryptMethod::Identity => Ok(data.to_vec()),
            CryptMethod::Rc4 => Ok(Arcfour::new(&self.object_key(id, method)).process(data)),
            CryptMethod::AesV2 => {
                if data.len() < 16 {
                    // Too short to hold an IV; treat as empty
                    return Ok(Vec::new());
                }
                let (iv, body) = data.split_at(16);
                let mut buffer = body.to_vec();
                let cipher = Aes128CbcDec::new_from_slices(&self.object_key(id, method), iv)
                    .map_err(|e| PdfToolsError::Encryption(e.to_string()))?;
                let plain = cipher
                    .decrypt_padded_mut::<Pkcs7>(&mut buffer)
                    .map_err(|e| PdfToolsError::Encryption(e.to_string()))?;
                Ok(plain.to_vec())
            }
        }
    }

    fn decrypt_object(&self, id: ObjectId, obj: &mut Object) -> Result<()> {
        if let Object::Stream(stream) = obj {
            for (_, value) in stream.dict.iter_mut() {
                transform_object(value, &|data| self.decrypt_bytes(id, self.string_method, data), false)?;
            }
            let skip = stream.dict.type_is(b"XRef")
                || (!self.encrypt_metadata && stream.dict.type_is(b"Metadata"));
            if !skip {
                let plain = self.decrypt_bytes(id, self.stream_method, &stream.content)?;
                stream.set_content(plain);
            }
            return Ok(());
        }
        transform_object(obj, &|data| self.decrypt_bytes(id, self.string_method, data), false)
    }
}

/// Inputs to the key derivation algorithms (ISO 32000-1, 7.6.3.3-7.6.3.4)
struct KeyParams<'a> {
    o: &'a [u8],
    u: &'a [u8],
    p: i32,
    doc_id: &'a [u8],
    revision: i64,
    key_len: usize,
    encrypt_metadata: bool,
}

impl KeyParams<'_> {
    fn authenticate_user(&self, password: &[u8]) -> Option<Vec<u8>> {
        let key = compute_encryption_key(
            password,
            self.o,
            self.p,
            self.doc_id,
            self.revision,
            self.key_len,
            self.encrypt_metadata,
        );
        let expected = compute_u_value(&key, self.doc_id, self.revision);
        let matches = if self.revision == 2 {
            self.u.len() >= 32 && expected[..32] == self.u[..32]
        } else {
            self.u.len() >= 16 && expected[..16] == self.u[..16]
        };
        matches.then_some(key)
    }

    fn authenticate_owner(&self, password: &[u8]) -> Option<Vec<u8>> {
        let rc4_key = owner_rc4_key(password, self.revision, self.key_len);
        let mut user_password = self.o.get(..32)?.to_vec();
        if self.revision == 2 {
            user_password = Arcfour::new(&rc4_key).process(&user_password);
        } else {
            for i in (0..20u8).rev() {
                let round_key: Vec<u8> = rc4_key.iter().map(|b| b ^ i).collect();
                user_password = Arcfour::new(&round_key).process(&user_password);
            }
        }
        self.authenticate_user(&user_password)
    }
}

fn pad_password(password: &[u8]) -> [u8; 32] {
    let mut padded = [0u8; 32];
    let len = password.len().min(32);
    padded[..len].copy_from_slice(&password[..len]);
    padded[len..].copy_from_slice(&PASSWORD_PADDING[..32 - len]);
    padded
}

/// Algorithm 2: file encryption key from the user password
fn compute_encryption_key(
    password: &[u8],
    o: &[u8],
    p: i32,
    doc_id: &[u8],
    revision: i64,
    key_len: usize,
    encrypt_metadata: bool,
) -> Vec<u8> {
    let mut hasher = Md5::new();
    hasher.update(pad_password(password));
    hasher.update(&o[..o.len().min(32)]);
    hasher.update((p as u32).to_le_bytes());
    hasher.update(doc_id);
    if revision >= 4 && !encrypt_metadata {
        hasher.update([0xFF; 4]);
    }
    let mut digest = hasher.finalize().to_vec();

    if revision >= 3 {
        for _ in 0..50 {
            digest = Md5::digest(&digest[..key_len]).to_vec();
        }
    }
    digest.truncate(key_len);
    digest
}

/// RC4 key derived from the owner password (Algorithm 3, steps a-d)
fn owner_rc4_key(owner_password: &[u8], revision: i64, key_len: usize) -> Vec<u8> {
    let mut digest = Md5::digest(pad_password(owner_password)).to_vec();
    if revision >= 3 {
        for _ in 0..50 {
            digest = Md5::digest(&digest).to_vec();
        }
    }
    let n = if revision == 2 { 5 } else { key_len };
    digest.truncate(n);
    digest
}

/// Algorithm 3: the `/O` value
fn compute_o_value(owner_password: &[u8], user_password: &[u8], revision: i64, key_len: usize) -> Vec<u8> {
    let rc4_key = owner_rc4_key(owner_password, revision, key_len);
    let mut value = Arcfour::new(&rc4_key).process(&pad_password(user_password));
    if revision >= 3 {
        for i in 1..=19u8 {
            let round_key: Vec<u8> = rc4_key.iter().map(|b| b ^ i).collect();
            value = Arcfour::new(&round_key).process(&value);
        }
    }
    value
}

/// Algorithms 4 and 5: the `/U` value
fn compute_u_value(key: &[u8], doc_id: &[u8], revision: i64) -> Vec<u8> {
    if revision == 2 {
        return Arcfour::new(key).process(&PASSWORD_PADDING);
    }

    let mut hasher = Md5::new();
    hasher.update(PASSWORD_PADDING);
    hasher.update(doc_id);
    let mut value = Arcfour::new(key).process(&hasher.finalize());
    for i in 1..=19u8 {
        let round_key: Vec<u8> = key.iter().map(|b| b ^ i).collect();
        value = Arcfour::new(&round_key).process(&value);
    }
    // Only the first 16 bytes are significant
    value.extend_from_slice(&PASSWORD_PADDING[..16]);
    value
}

fn rc4_object_key(key: &[u8], id: ObjectId) -> Vec<u8> {
    let mut hasher = Md5::new();
    hasher.update(key);
    hasher.update(&id.0.to_le_bytes()[..3]);
    hasher.update(&id.1.to_le_bytes()[..2]);
    let digest = hasher.finalize();
    let n = (key.len() + 5).min(16);
    digest[..n].to_vec()
}

/// Apply `transform` to every string (and, for `include_streams`, every
/// stream body) reachable inside one indirect object.
fn transform_object(
    obj: &mut Object,
    transform: &dyn Fn(&[u8]) -> Result<Vec<u8>>,
    include_streams: bool,
) -> Result<()> {
    match obj {
        Object::String(bytes, format) => {
            *bytes = transform(bytes)?;
            // Ciphertext can contain line breaks that literal syntax would normalise
            *format = StringFormat::Hexadecimal;
        }
        Object::Array(items) => {
            for item in items.iter_mut() {
                transform_object(item, transform, include_streams)?;
            }
        }
        Object::Dictionary(dict) => {
            for (_, value) in dict.iter_mut() {
                transform_object(value, transform, include_streams)?;
            }
        }
        Object::Stream(stream) => {
            for (_, value) in stream.dict.iter_mut() {
                transform_object(value, transform, include_streams)?;
            }
            if include_streams && !stream.dict.type_is(b"XRef") {
                let content = transform(&stream.content)?;
                stream.set_content(content);
            }
        }
        _ => {}
    }
    Ok(())
}

fn stream_has_type(obj: &Object, type_name: &[u8]) -> bool {
    matches!(obj, Object::Stream(stream) if stream.dict.type_is(type_name))
}

fn crypt_filter_method(encrypt: &Dictionary, key: &[u8]) -> Result<CryptMethod> {
    let name = match encrypt.get(key).and_then(Object::as_name) {
        Ok(name) => name,
        Err(_) => return Ok(CryptMethod::Identity),
    };
    if name == b"Identity" {
        return Ok(CryptMethod::Identity);
    }
    let cfm = encrypt
        .get(b"CF")
        .and_then(Object::as_dict)
        .and_then(|cf| cf.get(name))
        .and_then(Object::as_dict)
        .and_then(|filter| filter.get(b"CFM"))
        .and_then(Object::as_name)
        .unwrap_or(b"None");
    match cfm {
        b"V2" => Ok(CryptMethod::Rc4),
        b"AESV2" => Ok(CryptMethod::AesV2),
        b"None" => Ok(CryptMethod::Identity),
        other => Err(PdfToolsError::Encryption(format!(
            "Unsupported crypt filter: {}",
            String::from_utf8_lossy(other)
        ))),
    }
}

fn dict_int(dict: &Dictionary, key: &[u8]) -> Option<i64> {
    dict.get(key).and_then(Object::as_i64).ok()
}

fn dict_bytes(dict: &Dictionary, key: &[u8]) -> Result<Vec<u8>> {
    dict.get(key)
        .and_then(Object::as_str)
        .map(|s| s.to_vec())
        .map_err(|_| {
            PdfToolsError::Encryption(format!("Missing /{}", String::from_utf8_lossy(key)))
        })
}

/// RC4 stream cipher (symmetric)
struct Arcfour {
    state: [u8; 256],
    i: u8,
    j: u8,
}

impl Arcfour {
    fn new(key: &[u8]) -> Self {
        let mut state: [u8; 256] = std::array::from_fn(|i| i as u8);
        if !key.is_empty() {
            let mut j: u8 = 0;
            for i in 0..256 {
                j = j.wrapping_add(state[i]).wrapping_add(key[i % key.len()]);
                state.swap(i, j as usize);
            }
        }
        Self { state, i: 0, j: 0 }
    }

    fn process(&mut self, data: &[u8]) -> Vec<u8> {
        data.iter().map(|byte| byte ^ self.next_byte()).collect()
    }

    fn next_byte(&mut self) -> u8 {
        self.i = self.i.wrapping_add(1);
        self.j = self.j.wrapping_add(self.state[self.i as usize]);
        self.state.swap(self.i as usize, self.j as usize);
        let idx = self.state[self.i as usize].wrapping_add(self.state[self.j as usize]);
        self.state[idx as usize]
    }
}
