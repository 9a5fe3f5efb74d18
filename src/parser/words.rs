use std::collections::{HashMap, HashSet};

use itertools::Itertools;
use serde::ser::{Serialize, SerializeMap, Serializer};

pub const DEFAULT_MAX_WORDS: usize = 25;

const PORTUGUESE: &[&str] = &[
    "a", "à", "ao", "aos", "aquela", "aquelas", "aquele", "aqueles", "aquilo", "as", "às", "até",
    "com", "como", "da", "das", "de", "dela", "delas", "dele", "deles", "depois", "do", "dos",
    "e", "é", "ela", "elas", "ele", "eles", "em", "entre", "era", "eram", "éramos", "essa",
    "essas", "esse", "esses", "esta", "está", "estamos", "estão", "estar", "estas", "estava",
    "estavam", "estávamos", "este", "esteja", "estejam", "estejamos", "estes", "esteve", "estive",
    "estivemos", "estiver", "estivera", "estiveram", "estivéramos", "estiverem", "estivermos",
    "estivesse", "estivessem", "estivéssemos", "estou", "eu", "foi", "fomos", "for", "fora",
    "foram", "fôramos", "forem", "formos", "fosse", "fossem", "fôssemos", "fui", "há", "haja",
    "hajam", "hajamos", "hão", "havemos", "haver", "hei", "houve", "houvemos", "houver",
    "houvera", "houverá", "houveram", "houvéramos", "houverão", "houverei", "houverem",
    "houveremos", "houveria", "houveriam", "houveríamos", "houvermos", "houvesse", "houvessem",
    "houvéssemos", "isso", "isto", "já", "lhe", "lhes", "mais", "mas", "me", "mesmo", "meu",
    "meus", "minha", "minhas", "muito", "na", "não", "nas", "nem", "no", "nos", "nós", "nossa",
    "nossas", "nosso", "nossos", "num", "numa", "o", "os", "ou", "para", "pela", "pelas",
    "pelo", "pelos", "por", "qual", "quando", "que", "quem", "são", "se", "seja", "sejam",
    "sejamos", "sem", "ser", "será", "serão", "serei", "seremos", "seria", "seriam",
    "seríamos", "seu", "seus", "só", "somos", "sou", "sua", "suas", "também", "te", "tem",
    "tém", "temos", "tenha", "tenham", "tenhamos", "tenho", "terá", "terão", "terei",
    "teremos", "teria", "teriam", "teríamos", "teu", "teus", "teve", "tinha", "tinham",
    "tínhamos", "tive", "tivemos", "tiver", "tivera", "tiveram", "tivéramos", "tiverem",
    "tivermos", "tivesse", "tivessem", "tivéssemos", "tu", "tua", "tuas", "um", "uma", "você",
    "vocês", "vos",
];

/// Words that show up on almost every marketplace listing and say nothing
/// about the product itself.
const DOMAIN: &[&str] = &[
    "anatel", "homologação", "homologacao", "certificado", "certificação", "certificacao",
    "produto", "produtos", "preço", "preco", "frete", "grátis", "gratis", "compre", "comprar",
    "oferta", "ofertas", "promoção", "promocao", "loja", "lojas", "envio", "entrega",
    "parcelas", "juros", "vendido", "vendas", "venda", "novo", "nova", "original", "leve",
    "melhor", "melhores", "confira", "saiba", "veja", "aqui", "site", "www", "com", "br",
    "http", "https", "html", "mercado", "livre", "mercadolivre", "amazon", "shopee",
    "americanas", "magazine", "luiza", "magalu", "pague", "menos", "cartão", "cartao",
    "desconto", "estoque", "unidade", "unidades", "cor", "modelo", "marca",
];

/// Combined stop-word list used when ranking tokens.
#[derive(Debug, Clone)]
pub struct StopWords(HashSet<String>);

impl StopWords {
    pub fn portuguese() -> Self {
        StopWords(
            PORTUGUESE
                .iter()
                .chain(DOMAIN.iter())
                .map(|w| w.to_string())
                .collect(),
        )
    }

    pub fn contains(&self, word: &str) -> bool {
        self.0.contains(word)
    }
}

impl Default for StopWords {
    fn default() -> Self {
        StopWords::portuguese()
    }
}

/// Tokens ranked by frequency, most frequent first.
///
/// Serializes as a JSON object whose key order is the ranking.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WordCloud(Vec<(String, usize)>);

impl WordCloud {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[cfg(test)]
    fn entries(&self) -> &[(String, usize)] {
        &self.0
    }
}

impl Serialize for WordCloud {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (word, count) in &self.0 {
            map.serialize_entry(word, count)?;
        }
        map.end()
    }
}

/// Lower-cased alphanumeric runs of at least two characters.
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() >= 2)
        .map(str::to_string)
        .collect()
}

fn is_numeric(token: &str) -> bool {
    token.chars().all(char::is_numeric)
}

/// Tokens that survive stop-word and numeric filtering, in text order.
pub fn meaningful_tokens(text: &str, stop_words: &StopWords) -> Vec<String> {
    tokenize(text)
        .into_iter()
        .filter(|t| !stop_words.contains(t) && !is_numeric(t))
        .collect()
}

/// Rank surviving tokens by count; ties keep first appearance.
pub fn word_cloud(text: &str, stop_words: &StopWords, max_words: usize) -> WordCloud {
    let mut counts: HashMap<String, (usize, usize)> = HashMap::new();
    for (pos, token) in meaningful_tokens(text, stop_words).into_iter().enumerate() {
        counts.entry(token).or_insert((0, pos)).0 += 1;
    }

    let ranked = counts
        .into_iter()
        .sorted_by(|(_, (ca, pa)), (_, (cb, pb))| cb.cmp(ca).then(pa.cmp(pb)))
        .take(max_words)
        .map(|(word, (count, _))| (word, count))
        .collect();
    WordCloud(ranked)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filters_stop_words_short_and_numeric_tokens() {
        let tokens = meaningful_tokens("O produto é leve e tem 5 anos", &StopWords::portuguese());
        for banned in ["o", "é", "e", "leve", "tem", "5"] {
            assert!(!tokens.iter().any(|t| t == banned), "{} survived", banned);
        }
        assert!(tokens.contains(&"anos".to_string()));
    }

    #[test]
    fn tokenize_splits_on_punctuation() {
        assert_eq!(
            tokenize("Smartphone X-200, 128GB; Wi-Fi!"),
            vec!["smartphone", "200", "128gb", "wi", "fi"]
        );
    }

    #[test]
    fn accented_words_stay_whole() {
        assert_eq!(tokenize("Transceptor Rádio"), vec!["transceptor", "rádio"]);
    }

    #[test]
    fn ranks_by_frequency_then_first_appearance() {
        let text = "roteador wifi roteador antena wifi roteador dualband";
        let cloud = word_cloud(text, &StopWords::portuguese(), DEFAULT_MAX_WORDS);
        assert_eq!(
            cloud.entries(),
            &[
                ("roteador".to_string(), 3),
                ("wifi".to_string(), 2),
                ("antena".to_string(), 1),
                ("dualband".to_string(), 1),
            ]
        );
    }

    #[test]
    fn keeps_at_most_max_words() {
        let text = "alfa beta gama delta epsilon zeta";
        let cloud = word_cloud(text, &StopWords::portuguese(), 3);
        let words: Vec<&str> = cloud.entries().iter().map(|(w, _)| w.as_str()).collect();
        assert_eq!(words, vec!["alfa", "beta", "gama"]);
    }

    #[test]
    fn serializes_in_rank_order() {
        let cloud = word_cloud("zebra zebra abacaxi", &StopWords::portuguese(), 10);
        assert_eq!(serde_json::to_string(&cloud).unwrap(), r#"{"zebra":2,"abacaxi":1}"#);
    }

    #[test]
    fn only_stop_words_gives_empty_cloud() {
        let cloud = word_cloud("de para com 2024", &StopWords::portuguese(), 10);
        assert!(cloud.is_empty());
    }
}
