//! Category-keyed prompt templates for description generation and the
//! fixed translation prompt.

use crate::models::ImageData;

/// Closed set of product categories the generator has a template for.
/// Anything else is an unsupported category and must fail before the
/// text-generation collaborator is called.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProductCategory {
    Clothing,
    FurnitureAndDecor,
    Books,
}

impl ProductCategory {
    pub fn from_key(key: &str) -> Option<Self> {
        match key.trim() {
            "clothing" => Some(Self::Clothing),
            "furniture-and-decor" => Some(Self::FurnitureAndDecor),
            "books" => Some(Self::Books),
            _ => None,
        }
    }

    pub fn key(&self) -> &'static str {
        match self {
            Self::Clothing => "clothing",
            Self::FurnitureAndDecor => "furniture-and-decor",
            Self::Books => "books",
        }
    }
}

pub fn description_prompt(
    category: ProductCategory,
    product_name: &str,
    image: &ImageData,
) -> String {
    let analysis = analysis_block(product_name, image);
    match category {
        ProductCategory::Clothing => format!(
            "You are a professional e-commerce product copywriter. Write a compelling, \
             SEO-optimized product description for an apparel item based on the following \
             image analysis:\n\n{analysis}\n\
             Description Guidelines:\n\
             1. Use details from the product name to enhance the description.\n\
             2. Specify the target category (e.g., men's, women's, kids').\n\
             3. Highlight key features such as style, fit, and comfort.\n\
             4. Describe the fabric's feel confidently.\n\
             5. Suggest occasions for wearing the item.\n\
             6. Mention styling options and care instructions.\n\
             7. Include sizing or fit information.\n\
             8. Ensure the description is SEO-optimized with natural keyword usage.\n\
             9. Avoid keyword stuffing.\n\
             10. Keep the description under 150 words.\n\n\
             Key Features Section:\n\
             - Summarize fabric, fit, and versatility.\n\
             - Use engaging, keyword-rich language."
        ),
        ProductCategory::FurnitureAndDecor => format!(
            "You are an expert furniture and home decor copywriter. Write a captivating, \
             SEO-optimized product description for a furniture or decor item based on the \
             following image analysis:\n\n{analysis}\n\
             Description Guidelines:\n\
             1. Use details from the product name to enhance the description.\n\
             2. Clearly define the product type (e.g., sofa, lamp, wall art).\n\
             3. Highlight materials, craftsmanship, and durability.\n\
             4. Describe design elements and how they enhance home aesthetics.\n\
             5. Suggest placement ideas for different room settings.\n\
             6. Mention comfort, practicality, and maintenance tips.\n\
             7. Optimize for SEO with relevant keywords and natural readability.\n\
             8. Avoid keyword stuffing.\n\
             9. Keep the description under 150 words.\n\n\
             Key Features Section:\n\
             - Summarize materials, design, and functionality.\n\
             - Use keyword-rich yet engaging descriptions."
        ),
        ProductCategory::Books => format!(
            "You are a professional book description writer. Write an engaging, \
             SEO-optimized book description based on the following image analysis:\n\n\
             {analysis}\
             Description Guidelines:\n\
             1. Use details from the product name to enhance the description.\n\
             2. Clearly state the book's title, genre, and author (if detected).\n\
             3. Provide a brief, compelling synopsis without spoilers.\n\
             4. Highlight the book's unique appeal (e.g., themes, writing style).\n\
             5. Mention target audience (e.g., fiction lovers, self-help readers).\n\
             6. Suggest ideal reading situations (e.g., casual reading, study material).\n\
             7. Include SEO-friendly language while maintaining natural readability.\n\
             8. Avoid keyword stuffing.\n\
             9. Keep the description under 150 words.\n\n\
             Key Features Section:\n\
             - Summarize genre, themes, and appeal.\n\
             - Use engaging, keyword-rich language."
        ),
    }
}

pub fn translation_prompt(locale: &str, text: &str) -> String {
    format!(
        "You are a professional translator. Translate the following product description \
         into {locale}.\n\n\
         Original Text (English):\n{text}\n\n\
         Translation Guidelines:\n\
         - Maintain the tone and style of the original description.\n\
         - Ensure the text is fluent and sounds natural in {locale}.\n\
         - Adapt cultural nuances if necessary.\n\
         - Optimize for SEO where applicable.\n\n\
         Provide only the translated text without additional comments."
    )
}

fn analysis_block(product_name: &str, image: &ImageData) -> String {
    format!(
        "Product Name: {product_name}\n\n\
         Image Analysis Data:\n\
         - Labels: {labels}\n\
         - Objects detected: {objects}\n\
         - Dominant colors: {colors}\n\
         - Text detected: {text}\n\
         - Web entities: {entities}\n\n",
        labels = image.labels.join(", "),
        objects = image.objects.join(", "),
        colors = image.colors.join(", "),
        text = image.detected_text,
        entities = image.web_entities.join(", "),
    )
}
